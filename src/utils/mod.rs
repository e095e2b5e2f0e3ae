pub(crate) mod thread_id;

#[cfg(test)]
pub(crate) fn init_logging() {
    let _ = env_logger::builder()
        .format_timestamp(None)
        .filter_level(log::LevelFilter::Debug)
        .is_test(true)
        .try_init();
}
