//! Tokio driver for a sans-IO [`Connection`].
//!
//! The connection never touches a socket or a clock. The driver:
//!
//! - spawns one task per `Transmit`, sleeping out its backoff before the POST
//! - aborts those tasks on `Abort`
//! - feeds completions back through `handle_response`
//! - sleeps until `poll_timeout` and calls `handle_timeout`
//!
//! Completions and timeouts are handled one at a time on the calling task,
//! so the connection itself needs no locking.

use std::{cell::RefCell, collections::HashMap, rc::Rc, sync::Arc, time::Duration};

use parley_core::{
    Connection, ConnectionAction, ConnectionConfig, ConnectionError, Environment, HttpResponse,
    HttpTransport, PluginRegistry, RequestId, SessionAttachment, Status, Transmit,
    transport::REQUEST_HEADERS,
};
use tokio::task::{AbortHandle, JoinError, JoinSet};
use tracing::{error, trace};

use crate::sim_env::SimEnv;

type History = Rc<RefCell<Vec<(Status, Option<String>)>>>;

/// Runs a connection against an [`HttpTransport`]
pub struct Driver<T: HttpTransport> {
    env: SimEnv,
    conn: Connection<SimEnv>,
    transport: Arc<T>,
    service: Arc<str>,
    in_flight: JoinSet<(RequestId, HttpResponse)>,
    handles: HashMap<RequestId, AbortHandle>,
    history: History,
}

impl<T: HttpTransport> Driver<T> {
    /// Driver for a fresh connection to `service`.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` from [`Connection::new`].
    pub fn new(
        service: &str,
        env: SimEnv,
        config: ConnectionConfig,
        plugins: &PluginRegistry<SimEnv>,
        transport: T,
    ) -> Result<Self, ConnectionError> {
        let conn = Connection::new(service, env.clone(), config, plugins)?;
        Ok(Self {
            env,
            conn,
            transport: Arc::new(transport),
            service: Arc::from(service),
            in_flight: JoinSet::new(),
            handles: HashMap::new(),
            history: History::default(),
        })
    }

    /// The driven connection
    pub fn conn(&self) -> &Connection<SimEnv> {
        &self.conn
    }

    /// Mutable access for user operations; the connection clock is brought
    /// up to date first
    pub fn conn_mut(&mut self) -> &mut Connection<SimEnv> {
        self.conn.update_clock(self.env.now());
        &mut self.conn
    }

    /// The transport
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// POSTs currently running
    pub fn in_flight(&self) -> usize {
        self.handles.len()
    }

    /// Every status reported so far
    pub fn statuses(&self) -> Vec<Status> {
        self.history.borrow().iter().map(|(status, _)| *status).collect()
    }

    /// Condition of the most recent report of `status`
    pub fn condition_of(&self, status: Status) -> Option<String> {
        self.history
            .borrow()
            .iter()
            .rev()
            .find(|(seen, _)| *seen == status)
            .and_then(|(_, condition)| condition.clone())
    }

    fn recorder(&self) -> impl FnMut(Status, Option<&str>) + 'static {
        let history = Rc::clone(&self.history);
        move |status, condition| history.borrow_mut().push((status, condition.map(str::to_owned)))
    }

    /// Start a session; statuses are recorded by the driver.
    ///
    /// # Errors
    ///
    /// `InvalidState` from [`Connection::connect`].
    pub fn connect(&mut self, jid: &str, password: Option<&str>) -> Result<(), ConnectionError> {
        let recorder = self.recorder();
        let now = self.env.now();
        self.conn.connect(jid, password.map(str::to_owned), recorder, now)?;
        self.execute_actions();
        Ok(())
    }

    /// Resume an existing session.
    ///
    /// # Errors
    ///
    /// Errors from [`Connection::attach`].
    pub fn attach(&mut self, attachment: SessionAttachment) -> Result<(), ConnectionError> {
        let recorder = self.recorder();
        let now = self.env.now();
        self.conn.attach(attachment, recorder, now)?;
        self.execute_actions();
        Ok(())
    }

    fn execute_actions(&mut self) {
        while let Some(action) = self.conn.poll_action() {
            match action {
                ConnectionAction::Transmit(Transmit { request, rid, body, delay }) => {
                    let transport = Arc::clone(&self.transport);
                    let service = Arc::clone(&self.service);
                    let handle = self.in_flight.spawn(async move {
                        if !delay.is_zero() {
                            tokio::time::sleep(delay).await;
                        }
                        let result = transport.post(&service, REQUEST_HEADERS, body).await;
                        (request, HttpResponse::from(result))
                    });
                    trace!(%request, rid, ?delay, "spawned POST");
                    self.handles.insert(request, handle);
                },
                ConnectionAction::Abort { request } => {
                    if let Some(handle) = self.handles.remove(&request) {
                        trace!(%request, "aborting POST");
                        handle.abort();
                        self.conn.handle_cancelled(request);
                    }
                },
            }
        }
    }

    fn complete(&mut self, joined: Result<(RequestId, HttpResponse), JoinError>) {
        match joined {
            Ok((request, response)) => {
                self.handles.remove(&request);
                let now = self.env.now();
                self.conn.handle_response(request, response, now);
            },
            Err(err) if err.is_cancelled() => trace!("aborted POST finished"),
            Err(err) => error!(%err, "POST task failed"),
        }
    }

    /// Handle the next completion or idle deadline. Returns `false` when
    /// nothing is pending.
    pub async fn step(&mut self) -> bool {
        self.execute_actions();

        let deadline = self.conn.poll_timeout().map(tokio::time::Instant::from_std);
        if self.in_flight.is_empty() && deadline.is_none() {
            return false;
        }
        let wake_at = deadline.unwrap_or_else(tokio::time::Instant::now);

        tokio::select! {
            Some(joined) = self.in_flight.join_next(), if !self.in_flight.is_empty() => {
                self.complete(joined);
            },
            () = tokio::time::sleep_until(wake_at), if deadline.is_some() => {
                let now = self.env.now();
                self.conn.handle_timeout(now);
            },
        }

        self.execute_actions();
        true
    }

    /// Step until `done` holds.
    ///
    /// # Errors
    ///
    /// `Timeout` if `limit` of virtual time passes first.
    pub async fn run_until<P>(
        &mut self,
        mut done: P,
        limit: Duration,
    ) -> Result<(), ConnectionError>
    where
        P: FnMut(&Connection<SimEnv>) -> bool,
    {
        let deadline = tokio::time::Instant::now() + limit;
        loop {
            self.execute_actions();
            if done(&self.conn) {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(ConnectionError::Timeout { elapsed: limit });
            }

            let progressed = tokio::select! {
                progressed = self.step() => progressed,
                () = tokio::time::sleep_until(deadline) => true,
            };
            if !progressed {
                tokio::time::sleep_until(deadline).await;
            }
        }
    }

    /// Step until the connection reports `status`.
    ///
    /// # Errors
    ///
    /// `Timeout` if `limit` passes first.
    pub async fn wait_for(
        &mut self,
        status: Status,
        limit: Duration,
    ) -> Result<(), ConnectionError> {
        let history = Rc::clone(&self.history);
        let seen = history.borrow().len();
        let reached = move |_: &Connection<SimEnv>| {
            history.borrow()[seen..].iter().any(|(reported, _)| *reported == status)
        };
        self.run_until(reached, limit).await
    }

    /// Keep driving for `duration` of virtual time
    pub async fn settle(&mut self, duration: Duration) {
        if self.run_until(|_| false, duration).await.is_err() {
            trace!(?duration, "settled");
        }
    }
}
