//! Request/reply fixture: one server, any number of clients
//!
//! Everything runs on a single [`MemoryNetwork`], so a test drives both ends
//! from one thread and every frame lands in the peer's event queue before the
//! next call returns.
//!
//! # Example
//!
//! ```no_run
//! use creditline_integration_tests::fixtures::RequestReplyFixture;
//!
//! let fixture = RequestReplyFixture::new();
//! let client = fixture.client();
//!
//! fixture.request(&client, "ping");
//! fixture.serve();
//! let reply = fixture.take_reply(&client).unwrap();
//! assert_eq!(reply.body_text().as_deref(), Some("reply to ping"));
//! ```

use creditline_core::{CreditRequest, DeliveryHandle, Endpoint, EndpointConfig, Message};
use creditline_transport::MemoryNetwork;

/// Server name used by the fixture
pub const SERVER: &str = "server";

/// One server endpoint on a private network
pub struct RequestReplyFixture {
    /// Network every endpoint of the fixture attaches to
    pub net: MemoryNetwork,
    /// Started server endpoint
    pub server: Endpoint,
}

impl RequestReplyFixture {
    /// Server with outgoing and incoming windows of 10
    pub fn new() -> Self {
        Self::with_config(
            EndpointConfig::named(SERVER)
                .with_outgoing_window(10)
                .with_incoming_window(10),
        )
    }

    /// Server built from `config`
    pub fn with_config(config: EndpointConfig) -> Self {
        let net = MemoryNetwork::new();
        let server = Endpoint::on_memory(&net, config).expect("server endpoint");
        server.start().expect("server start");
        Self { net, server }
    }

    /// Server address
    pub fn address(&self) -> String {
        self.server.address().to_string()
    }

    /// New started client with a random name
    pub fn client(&self) -> Endpoint {
        self.client_with(EndpointConfig::default())
    }

    /// New started client built from `config`
    pub fn client_with(&self, config: EndpointConfig) -> Endpoint {
        let client = Endpoint::on_memory(&self.net, config).expect("client endpoint");
        client.start().expect("client start");
        client
    }

    /// Put one request to the server and transfer it
    pub fn request(&self, client: &Endpoint, body: &str) -> DeliveryHandle {
        let handle = client
            .put(
                &Message::new(self.address())
                    .with_text(body)
                    .with_reply_to("~"),
            )
            .expect("put request");
        assert_eq!(client.send(CreditRequest::Exact(1)).expect("send request"), 1);
        handle
    }

    /// Answer every pending request with `"reply to " + body`.
    ///
    /// Returns the reply handles, in the order the requests arrived.
    pub fn serve(&self) -> Vec<DeliveryHandle> {
        self.server
            .recv(CreditRequest::Unbounded)
            .expect("server recv");

        let mut replies = Vec::new();
        let mut request = Message::default();
        while self.server.get(&mut request).is_ok() {
            if let Some(reply_to) = request.reply_to() {
                let body = request.body_text().unwrap_or_default();
                let reply = Message::new(reply_to).with_text(format!("reply to {body}"));
                replies.push(self.server.put(&reply).expect("put reply"));
            }
            self.server.accept();
        }

        self.server
            .send(CreditRequest::Unbounded)
            .expect("server send");
        replies
    }

    /// Grant one unit of receive credit and take the next message, accepting it
    pub fn take_reply(&self, client: &Endpoint) -> Option<Message> {
        client.recv(CreditRequest::Exact(1)).expect("client recv");
        let mut reply = Message::default();
        client.get(&mut reply).ok()?;
        client.accept();
        Some(reply)
    }
}

impl Default for RequestReplyFixture {
    fn default() -> Self {
        Self::new()
    }
}
