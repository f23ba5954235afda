//! Request/reply scenarios run on an in-process network.
//!
//! The server polls its endpoint on a tokio task: it grants unbounded receive
//! credit, answers every request that carries a `reply_to`, and keeps at most
//! `keep_unsettled` replies unsettled, settling older ones oldest first.

use crate::config::{Config, ScenarioConfig};
use creditline_core::{
    CreditRequest, DeliveryHandle, Endpoint, EndpointConfig, Message, MessengerError,
};
use creditline_transport::MemoryNetwork;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep};
use tracing::{info, warn};

/// Body of the request sent by the vanishing client
pub const AWOL_REQUEST: &str = "request from awol";

/// What the server did while it ran
#[derive(Debug, Default, Clone)]
pub struct ServerReport {
    /// Requests answered
    pub handled: usize,
    /// Replies whose outcome was lost with their peer
    pub unknown_outcomes: usize,
    /// Deliveries settled by window eviction
    pub auto_settled: usize,
    /// Replies still unsettled at shutdown
    pub unsettled: usize,
}

/// One completed request/reply exchange
#[derive(Debug, Clone)]
pub struct Exchange {
    /// Client name
    pub client: String,
    /// Request body
    pub request: String,
    /// Reply body
    pub reply: String,
}

/// Outcome of the vanished-client scenario
#[derive(Debug, Clone)]
pub struct AwolReport {
    /// Replies the vanishing client took before it disappeared
    pub taken: Vec<String>,
    /// Exchanges completed by the clients that came afterwards
    pub exchanges: Vec<Exchange>,
    /// Server activity
    pub server: ServerReport,
}

struct Dispatcher {
    endpoint: Arc<Endpoint>,
    trackers: VecDeque<DeliveryHandle>,
    keep_unsettled: usize,
    awol_replies: usize,
    report: ServerReport,
}

impl Dispatcher {
    fn poll(&mut self) -> anyhow::Result<()> {
        self.endpoint.recv(CreditRequest::Unbounded)?;

        while let Some(request) = take_message(&self.endpoint)? {
            self.dispatch(&request);
            self.endpoint.accept();
            self.report.handled += 1;
        }

        self.endpoint.send(CreditRequest::Unbounded)?;

        let unresolved = self.endpoint.unresolved();
        if !unresolved.is_empty() {
            warn!(
                "{} repl(ies) lost with their peer, settling",
                unresolved.len()
            );
            for handle in &unresolved {
                self.endpoint.settle(*handle);
            }
            self.trackers.retain(|h| !unresolved.contains(h));
            self.report.unknown_outcomes += unresolved.len();
        }
        self.report.auto_settled += self.endpoint.take_auto_settled().len();
        Ok(())
    }

    fn dispatch(&mut self, request: &Message) {
        let Some(reply_to) = request.reply_to() else {
            return;
        };
        let body = request.body_text().unwrap_or_default();

        let replies: Vec<Message> = if body == AWOL_REQUEST {
            (0..self.awol_replies)
                .map(|a| Message::new(reply_to).with_text(format!("reply {a} for awol ").repeat(10)))
                .collect()
        } else {
            let mut reply = Message::new(reply_to).with_text(format!("reply to {body}"));
            reply.correlation_id = request.correlation_id.clone();
            vec![reply]
        };

        for reply in replies {
            match self.endpoint.put(&reply) {
                Ok(handle) => self.track(handle),
                Err(e) => warn!("Cannot reply to {}: {}", reply_to, e),
            }
        }
    }

    fn track(&mut self, handle: DeliveryHandle) {
        self.trackers.push_back(handle);
        while self.trackers.len() > self.keep_unsettled {
            if let Some(old) = self.trackers.pop_front() {
                self.endpoint.settle(old);
            }
        }
    }
}

/// Running server task
pub struct Server {
    endpoint: Arc<Endpoint>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<anyhow::Result<ServerReport>>,
}

impl Server {
    /// Start a server endpoint on `net` and poll it on a background task.
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint cannot be created or started.
    pub fn spawn(
        net: &MemoryNetwork,
        config: EndpointConfig,
        scenario: &ScenarioConfig,
    ) -> anyhow::Result<Self> {
        let endpoint = Arc::new(Endpoint::on_memory(net, config)?);
        endpoint.start()?;
        info!("Server listening at {}", endpoint.address());

        let (shutdown, mut stop) = watch::channel(false);
        let mut dispatcher = Dispatcher {
            endpoint: Arc::clone(&endpoint),
            trackers: VecDeque::new(),
            keep_unsettled: scenario.keep_unsettled,
            awol_replies: scenario.replies,
            report: ServerReport::default(),
        };
        let interval = scenario.poll_interval();

        let task = tokio::spawn(async move {
            loop {
                dispatcher.poll()?;
                tokio::select! {
                    _ = stop.changed() => break,
                    () = sleep(interval) => {}
                }
            }
            dispatcher.poll()?;
            dispatcher.report.unsettled = dispatcher.trackers.len();
            Ok(dispatcher.report)
        });

        Ok(Self {
            endpoint,
            shutdown,
            task,
        })
    }

    /// Address clients send requests to
    #[must_use]
    pub fn address(&self) -> &str {
        self.endpoint.address()
    }

    /// Stop polling and collect the report
    ///
    /// # Errors
    ///
    /// Returns an error if the server task failed.
    pub async fn shutdown(self) -> anyhow::Result<ServerReport> {
        let _ = self.shutdown.send(true);
        let report = self.task.await??;
        self.endpoint.close();
        Ok(report)
    }
}

fn take_message(endpoint: &Endpoint) -> anyhow::Result<Option<Message>> {
    let mut slot = Message::default();
    match endpoint.get(&mut slot) {
        Ok(_) => Ok(Some(slot)),
        Err(MessengerError::NoMessageAvailable) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Poll `endpoint` until a message arrives, accepting it
async fn wait_for_message(
    endpoint: &Endpoint,
    credit: CreditRequest,
    scenario: &ScenarioConfig,
) -> anyhow::Result<Message> {
    let deadline = Instant::now() + scenario.reply_timeout();
    let refill = match credit {
        CreditRequest::Unbounded => CreditRequest::Unbounded,
        _ => CreditRequest::None,
    };
    let mut request = credit;

    loop {
        if let Some(message) = take_message(endpoint)? {
            endpoint.accept();
            return Ok(message);
        }
        if endpoint.recv(request)? == 0 {
            if Instant::now() >= deadline {
                anyhow::bail!("{} timed out waiting for a reply", endpoint.name());
            }
            sleep(scenario.poll_interval()).await;
        }
        request = refill;
    }
}

async fn request_reply(
    net: &MemoryNetwork,
    server: &str,
    body: String,
    scenario: &ScenarioConfig,
) -> anyhow::Result<Exchange> {
    let client = Endpoint::on_memory(net, EndpointConfig::default())?;
    client.start()?;

    client.put(&Message::new(server).with_text(body.clone()).with_reply_to("~"))?;
    client.send(CreditRequest::Exact(1))?;
    let reply = wait_for_message(&client, CreditRequest::Exact(1), scenario).await?;
    client.close();

    Ok(Exchange {
        client: client.name().to_string(),
        request: body,
        reply: reply.body_text().unwrap_or_default(),
    })
}

/// Client sends `requests` requests, the server answers each with `"reply to " + body`
///
/// # Errors
///
/// Returns an error if an endpoint fails or a reply does not arrive in time.
pub async fn run_round_trip(config: &Config) -> anyhow::Result<(Vec<Exchange>, ServerReport)> {
    let scenario = &config.scenario;
    let net = MemoryNetwork::new();
    let server = Server::spawn(&net, config.endpoint.clone(), scenario)?;
    let address = server.address().to_string();

    let mut exchanges = Vec::with_capacity(scenario.requests);
    for _ in 0..scenario.requests {
        exchanges.push(request_reply(&net, &address, scenario.body.clone(), scenario).await?);
    }

    let report = server.shutdown().await?;
    Ok((exchanges, report))
}

/// A client vanishes mid-exchange; fresh clients must still be served
///
/// # Errors
///
/// Returns an error if an endpoint fails or a reply does not arrive in time.
pub async fn run_awol(config: &Config) -> anyhow::Result<AwolReport> {
    let scenario = &config.scenario;
    let net = MemoryNetwork::new();
    let server = Server::spawn(&net, config.endpoint.clone(), scenario)?;
    let address = server.address().to_string();

    let awol = Endpoint::on_memory(&net, EndpointConfig::default())?;
    awol.start()?;
    awol.put(
        &Message::new(&address)
            .with_text(AWOL_REQUEST)
            .with_reply_to("~"),
    )?;
    awol.send(CreditRequest::Unbounded)?;

    let mut taken = Vec::with_capacity(scenario.taken);
    for _ in 0..scenario.taken {
        let reply = wait_for_message(&awol, CreditRequest::Unbounded, scenario).await?;
        taken.push(reply.body_text().unwrap_or_default());
    }

    info!("{} goes awol after {} repl(ies)", awol.name(), taken.len());
    net.crash(awol.name());
    drop(awol);

    let mut exchanges = Vec::with_capacity(scenario.clients);
    for i in 0..scenario.clients {
        let body = format!("message {i} from client");
        exchanges.push(request_reply(&net, &address, body, scenario).await?);
    }

    let server = server.shutdown().await?;
    Ok(AwolReport {
        taken,
        exchanges,
        server,
    })
}
