//! Future-producing TCP helpers
//!
//! The blocking connect/accept calls run on a helper thread; the caller gets a future it can
//! wait on from a task. Failures arrive as [`TaskError::Io`](crate::error::TaskError::Io).
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};

use crate::future::{run_in_thread, Future};

/// Connects to `addr`.
pub fn connect_to<A>(addr: A) -> Future<TcpStream>
where
    A: ToSocketAddrs + Send + 'static,
{
    run_in_thread(move || Ok(TcpStream::connect(addr)?))
}

/// Accepts the next incoming connection on `listener`.
pub fn accept_incoming(listener: &TcpListener) -> Future<(TcpStream, SocketAddr)> {
    match listener.try_clone() {
        Ok(listener) => run_in_thread(move || Ok(listener.accept()?)),
        Err(err) => Future::failed_with(err.into()),
    }
}

#[cfg(test)]
mod test {
    use std::{
        io::{Read, Write},
        net::TcpListener,
        sync::Arc,
    };

    use parking_lot::Mutex;

    use super::{accept_incoming, connect_to};
    use crate::{
        error::TaskError,
        executor::Scheduler,
        future::{wait_for_all, Waitable},
        task::{from_fn, Directive, ExecutionPolicy},
    };

    #[test]
    fn task_accepts_what_it_connects() {
        let scheduler = Scheduler::new();
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let greeting = Arc::new(Mutex::new(String::new()));
        let sink = greeting.clone();
        let mut step = 0;
        let mut pending = None;
        let future = scheduler.start_task(
            from_fn(move |_| {
                step += 1;
                match step {
                    1 => {
                        let accepted = accept_incoming(&listener);
                        let connected = connect_to(addr);
                        let both = wait_for_all(&[&accepted as &dyn Waitable, &connected]);
                        pending = Some((accepted, connected));
                        Ok(Some(Directive::wait(&both)))
                    }
                    _ => {
                        let (accepted, connected) = pending.take().ok_or(TaskError::Pending)?;
                        let (mut server, _) = accepted.take_result()?;
                        let mut client = connected.take_result()?;
                        client.write_all(b"hello")?;
                        drop(client);
                        server.read_to_string(&mut sink.lock())?;
                        Ok(Some(Directive::Result(())))
                    }
                }
            }),
            ExecutionPolicy::RunWhileFutureLives,
        );

        scheduler.wait_for(&future).unwrap();
        assert_eq!(*greeting.lock(), "hello");
    }

    #[test]
    fn refused_connection_fails_the_future() {
        let scheduler = Scheduler::new();
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap()
        };

        let connected = connect_to(addr);
        assert!(scheduler.block_on(&connected).is_err());
        assert!(matches!(connected.error(), Some(TaskError::Io(_))));
    }
}
