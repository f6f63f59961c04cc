//! Single-threaded loop that feeds timers and I/O completions into an engine.
//!
//! The engine never leaves the thread that calls [`EventLoop::run`]. Network
//! tasks on the tokio runtime only post [`HostEvent`]s; the loop turns each one
//! into a call of the prelude's dispatcher, one task at a time, flushing
//! microtasks after every task.

use crate::bindings::{HostContext, RequestRegistry, SocketRegistry, TimerQueue};
use crate::events::HostEvent;
use crate::runtime::fire_timer_script;
use crate::JsEngine;
use anyhow::{Result, anyhow};
use log::{debug, trace};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use tokio::runtime::Handle;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::timeout_at;

/// URL reported for scripts the loop evaluates.
const DISPATCH_URL: &str = "badge://event_loop";

fn lock<'guard, T>(mutex: &'guard Mutex<T>, what: &str) -> Result<MutexGuard<'guard, T>> {
    mutex.lock().map_err(|_| anyhow!("{what} mutex poisoned"))
}

/// Drives script callbacks until nothing is left to wait for.
pub struct EventLoop {
    receiver: UnboundedReceiver<HostEvent>,
    timers: Arc<Mutex<TimerQueue>>,
    sockets: Arc<Mutex<SocketRegistry>>,
    requests: Arc<Mutex<RequestRegistry>>,
    handle: Handle,
    /// Number of tasks (timer firings and events) dispatched so far.
    dispatched: u64,
}

impl EventLoop {
    /// Build a loop over the registries of `context`, draining `receiver`.
    pub fn new(context: &HostContext, receiver: UnboundedReceiver<HostEvent>) -> Self {
        Self {
            receiver,
            timers: Arc::clone(&context.timers),
            sockets: Arc::clone(&context.sockets),
            requests: Arc::clone(&context.requests),
            handle: context.tokio_handle.clone(),
            dispatched: 0,
        }
    }

    /// Tasks dispatched so far.
    pub fn dispatched(&self) -> u64 {
        self.dispatched
    }

    /// True when no timer, socket or request can produce further work.
    ///
    /// # Errors
    /// Returns an error if a registry lock is poisoned.
    pub fn is_idle(&self) -> Result<bool> {
        Ok(lock(&self.timers, "timer queue")?.is_empty()
            && lock(&self.sockets, "socket registry")?.is_empty()
            && lock(&self.requests, "request registry")?.is_empty())
    }

    /// Run until idle. Must not be called from inside the tokio runtime.
    ///
    /// # Errors
    /// Returns the first error a dispatched callback raises; the loop does not continue after it.
    pub fn run<E: JsEngine + ?Sized>(&mut self, engine: &mut E) -> Result<()> {
        loop {
            while let Ok(event) = self.receiver.try_recv() {
                self.dispatch_event(engine, event)?;
            }

            let due = lock(&self.timers, "timer queue")?.pop_due(Instant::now());
            if let Some(id) = due {
                self.run_task(engine, &fire_timer_script(id))?;
                continue;
            }

            if self.is_idle()? {
                debug!("event loop idle after {} tasks", self.dispatched);
                return Ok(());
            }

            let deadline = lock(&self.timers, "timer queue")?.next_deadline();
            let received = match deadline {
                Some(deadline) => self
                    .handle
                    .block_on(timeout_at(deadline.into(), self.receiver.recv()))
                    .ok(),
                None => Some(self.handle.block_on(self.receiver.recv())),
            };
            match received {
                Some(Some(event)) => self.dispatch_event(engine, event)?,
                // Channel closed: only timers can still fire.
                Some(None) if deadline.is_none() => return Ok(()),
                Some(None) | None => {}
            }
        }
    }

    fn dispatch_event<E: JsEngine + ?Sized>(&mut self, engine: &mut E, event: HostEvent) -> Result<()> {
        match &event {
            HostEvent::SocketClose { id, .. } => {
                lock(&self.sockets, "socket registry")?.release(*id);
            }
            HostEvent::RequestDone { id, .. } => {
                if !lock(&self.requests, "request registry")?.release(*id) {
                    trace!("request {id}: completion after abort dropped");
                    return Ok(());
                }
            }
            HostEvent::SocketOpen { .. }
            | HostEvent::SocketMessage { .. }
            | HostEvent::SocketError { .. } => {}
        }
        let script = event.dispatch_script()?;
        self.run_task(engine, &script)
    }

    fn run_task<E: JsEngine + ?Sized>(&mut self, engine: &mut E, script: &str) -> Result<()> {
        self.dispatched = self.dispatched.saturating_add(1);
        engine.eval_script(script, DISPATCH_URL)?;
        engine.run_jobs()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, reason = "test assertions")]

    use super::*;
    use crate::bindings::{SocketCommand, SocketConnector, SocketRequest};
    use crate::events::SocketEvents;
    use crate::{ConsoleLogger, HostBindings, ValueHandle};
    use core::time::Duration;
    use futures::future::BoxFuture;
    use tokio::runtime::Runtime;
    use tokio::sync::mpsc;

    struct NoNetwork;

    impl SocketConnector for NoNetwork {
        fn connect(
            &self,
            _request: SocketRequest,
            _commands: mpsc::UnboundedReceiver<SocketCommand>,
            _events: SocketEvents,
        ) -> BoxFuture<'static, ()> {
            Box::pin(async {})
        }
    }

    /// Records scripts instead of running them; timer firings cancel nothing.
    #[derive(Default)]
    struct ScriptLog {
        scripts: Vec<String>,
        jobs: usize,
        fail_on: Option<&'static str>,
    }

    impl JsEngine for ScriptLog {
        fn install_bindings(&mut self, _: &HostContext, _: &HostBindings) -> Result<()> {
            Ok(())
        }
        fn eval_script(&mut self, source: &str, _url: &str) -> Result<()> {
            self.scripts.push(source.to_owned());
            match self.fail_on {
                Some(needle) if source.contains(needle) => Err(anyhow!("Uncaught Error: boom")),
                _ => Ok(()),
            }
        }
        fn run_jobs(&mut self) -> Result<()> {
            self.jobs += 1;
            Ok(())
        }
        fn call_global(&mut self, name: &str) -> Result<ValueHandle> {
            Err(anyhow!("{name} is not a function"))
        }
        fn call_method(&mut self, _: ValueHandle, _: &str) -> Result<()> {
            Ok(())
        }
    }

    fn context(runtime: &Runtime) -> (HostContext, mpsc::UnboundedReceiver<HostEvent>) {
        HostContext::new(Arc::new(ConsoleLogger), runtime.handle().clone(), Arc::new(NoNetwork))
    }

    #[test]
    fn idle_loop_returns_immediately() {
        let runtime = Runtime::new().unwrap();
        let (context, receiver) = context(&runtime);
        let mut event_loop = EventLoop::new(&context, receiver);
        let mut engine = ScriptLog::default();
        event_loop.run(&mut engine).unwrap();
        assert!(engine.scripts.is_empty());
        assert_eq!(event_loop.dispatched(), 0);
    }

    #[test]
    fn timers_fire_in_order_with_microtask_flush() {
        let runtime = Runtime::new().unwrap();
        let (context, receiver) = context(&runtime);
        {
            let mut timers = context.timers.lock().unwrap();
            let now = Instant::now();
            timers.schedule(2, Duration::from_millis(20), now);
            timers.schedule(1, Duration::from_millis(5), now);
        }
        let mut event_loop = EventLoop::new(&context, receiver);
        let mut engine = ScriptLog::default();
        event_loop.run(&mut engine).unwrap();
        assert_eq!(
            engine.scripts,
            ["__badgeHost.fireTimer(1);", "__badgeHost.fireTimer(2);"]
        );
        assert_eq!(engine.jobs, 2);
    }

    #[test]
    fn socket_stays_pending_until_close_is_dispatched() {
        let runtime = Runtime::new().unwrap();
        let (context, receiver) = context(&runtime);
        let (commands, _command_receiver) = mpsc::unbounded_channel();
        let id = context.sockets.lock().unwrap().register(commands);
        let events = SocketEvents::new(id, context.events.clone());
        runtime.spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            events.open(String::new());
            events.close(1000, String::from("done"), true);
        });

        let mut event_loop = EventLoop::new(&context, receiver);
        let mut engine = ScriptLog::default();
        event_loop.run(&mut engine).unwrap();
        assert_eq!(engine.scripts.len(), 2);
        assert!(engine.scripts[0].contains(r#""type":"socketOpen""#));
        assert!(engine.scripts[1].contains(r#""type":"socketClose""#));
        assert!(context.sockets.lock().unwrap().is_empty());
    }

    #[test]
    fn aborted_request_completion_is_not_dispatched() {
        let runtime = Runtime::new().unwrap();
        let (context, receiver) = context(&runtime);
        let id = context.requests.lock().unwrap().allocate_id();
        context.requests.lock().unwrap().abort(id);
        context
            .events
            .send(HostEvent::RequestDone {
                id,
                status: 200,
                status_text: String::from("OK"),
                headers: Vec::new(),
                body: String::new(),
                url: String::from("http://facilitator.example/"),
                error: None,
            })
            .unwrap();
        let mut event_loop = EventLoop::new(&context, receiver);
        let mut engine = ScriptLog::default();
        event_loop.run(&mut engine).unwrap();
        assert!(engine.scripts.is_empty());
    }

    #[test]
    fn callback_failure_stops_the_loop() {
        let runtime = Runtime::new().unwrap();
        let (context, receiver) = context(&runtime);
        {
            let mut timers = context.timers.lock().unwrap();
            let now = Instant::now();
            timers.schedule(1, Duration::ZERO, now);
            timers.schedule(2, Duration::from_millis(1), now);
        }
        let mut event_loop = EventLoop::new(&context, receiver);
        let mut engine = ScriptLog {
            fail_on: Some("fireTimer(1)"),
            ..ScriptLog::default()
        };
        let error = event_loop.run(&mut engine).unwrap_err();
        assert_eq!(error.to_string(), "Uncaught Error: boom");
        assert_eq!(engine.scripts.len(), 1);
    }
}
