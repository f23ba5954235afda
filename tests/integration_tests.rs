//! Integration tests for request/reply over credit-flow links.
//!
//! Each test drives real endpoints over an in-memory network: a client puts
//! requests, the server answers them, and both sides settle what they
//! received.

use creditline_core::{
    CreditRequest, DEFAULT_LINK_CREDIT, DeliveryState, Direction, Disposition, Endpoint,
    EndpointConfig, Message, MessengerError,
};
use creditline_integration_tests::fixtures::RequestReplyFixture;
use creditline_integration_tests::test_helpers::{default_deadline, init_tracing, recv_one};
use std::sync::Arc;
use std::thread;

// ============================================================================
// Round Trip
// ============================================================================

#[test]
fn test_round_trip() {
    init_tracing();
    let fixture = RequestReplyFixture::new();
    let client = fixture.client();

    let request = fixture.request(&client, "hello world");
    let replies = fixture.serve();
    assert_eq!(replies.len(), 1);

    let reply = fixture.take_reply(&client).expect("reply");
    assert_eq!(reply.body_text().as_deref(), Some("reply to hello world"));
    assert_eq!(reply.address(), Some(client.address()));

    // The server accepted the request and the client accepted the reply
    assert_eq!(client.disposition(request), Ok(Some(Disposition::Accepted)));
    assert_eq!(
        fixture.server.disposition(replies[0]),
        Ok(Some(Disposition::Accepted))
    );
}

#[test]
fn test_round_trip_many_requests_in_order() {
    let fixture = RequestReplyFixture::new();
    let client = fixture.client();

    for i in 0..5 {
        fixture.request(&client, &format!("request {i}"));
    }
    assert_eq!(fixture.serve().len(), 5);

    assert_eq!(client.recv(CreditRequest::Unbounded), Ok(5));
    let mut reply = Message::default();
    for i in 0..5 {
        client.get(&mut reply).unwrap();
        assert_eq!(
            reply.body_text(),
            Some(format!("reply to request {i}"))
        );
        client.accept();
    }
    assert_eq!(
        client.get(&mut reply),
        Err(MessengerError::NoMessageAvailable)
    );
}

#[test]
fn test_reject_reaches_sender() {
    let fixture = RequestReplyFixture::new();
    let client = fixture.client();
    let request = fixture.request(&client, "unwanted");

    fixture.server.recv(CreditRequest::Exact(1)).unwrap();
    let mut slot = Message::default();
    let handle = fixture.server.get(&mut slot).unwrap();
    assert_eq!(fixture.server.reject(), Some(handle));
    assert_eq!(fixture.server.reject(), None);

    assert_eq!(client.disposition(request), Ok(Some(Disposition::Rejected)));
}

// ============================================================================
// Window Overflow
// ============================================================================

#[test]
fn test_outgoing_window_overflow_settles_oldest() {
    init_tracing();
    let fixture = RequestReplyFixture::new();
    let sender = fixture.client_with(EndpointConfig::default().with_outgoing_window(10));
    let address = fixture.address();

    let handles: Vec<_> = (0..20)
        .map(|i| {
            sender
                .put(&Message::new(&address).with_text(format!("message {i}")))
                .unwrap()
        })
        .collect();
    assert_eq!(sender.send(CreditRequest::Unbounded), Ok(20));

    let evicted = sender.take_auto_settled();
    assert_eq!(evicted, handles[..10].to_vec());
    for handle in &handles[..10] {
        assert_eq!(sender.status(*handle), Some(DeliveryState::Settled));
    }

    let link = sender.link_to(&address).unwrap();
    assert_eq!(sender.peek(link, Direction::Outgoing), handles[10..].to_vec());

    // Every message still arrives, in order
    assert_eq!(fixture.server.recv(CreditRequest::Unbounded), Ok(20));
    let mut slot = Message::default();
    for i in 0..20 {
        fixture.server.get(&mut slot).unwrap();
        assert_eq!(slot.body_text(), Some(format!("message {i}")));
    }
}

#[test]
fn test_incoming_window_overflow_is_implicit_accept() {
    let fixture = RequestReplyFixture::new();
    let sender = fixture.client();
    let address = fixture.address();

    let handles: Vec<_> = (0..20)
        .map(|i| {
            sender
                .put(&Message::new(&address).with_text(format!("message {i}")))
                .unwrap()
        })
        .collect();
    assert_eq!(sender.send(CreditRequest::Unbounded), Ok(20));

    // The server never accepts anything; its window of 10 forces the oldest out
    assert_eq!(fixture.server.recv(CreditRequest::Unbounded), Ok(20));
    let evicted = fixture.server.take_auto_settled();
    assert_eq!(evicted.len(), 10);

    let link = fixture.server.links()[0];
    assert_eq!(fixture.server.peek(link, Direction::Incoming).len(), 10);

    for handle in &handles[..10] {
        assert_eq!(sender.disposition(*handle), Ok(Some(Disposition::Accepted)));
    }
    for handle in &handles[10..] {
        assert_eq!(sender.disposition(*handle), Ok(None));
    }
}

#[test]
fn test_settle_all_before_propagates_to_receiver() {
    let fixture = RequestReplyFixture::new();
    let sender = fixture.client();
    let address = fixture.address();

    for i in 0..5 {
        sender
            .put(&Message::new(&address).with_text(format!("message {i}")))
            .unwrap();
    }
    assert_eq!(sender.send(CreditRequest::Unbounded), Ok(5));
    assert_eq!(fixture.server.recv(CreditRequest::Unbounded), Ok(5));

    let link = sender.link_to(&address).unwrap();
    assert_eq!(sender.settle_all_before(link, Direction::Outgoing, 3), 3);
    assert_eq!(sender.peek(link, Direction::Outgoing).len(), 2);

    fixture.server.process_events();
    let server_link = fixture.server.links()[0];
    assert_eq!(
        fixture.server.peek(server_link, Direction::Incoming).len(),
        2
    );
}

// ============================================================================
// Link Credit
// ============================================================================

#[test]
fn test_receiver_prefetch_holds_back_sender() {
    let fixture =
        RequestReplyFixture::with_config(EndpointConfig::named("server").with_link_prefetch(4));
    let client = fixture.client();
    fixture.request(&client, "opens the link");

    // The server learns about the link and advertises its prefetch
    fixture.server.process_events();
    for i in 0..10 {
        client
            .put(&Message::new(fixture.address()).with_text(format!("m{i}")))
            .unwrap();
    }
    assert_eq!(client.send(CreditRequest::Unbounded), Ok(3));
    assert_eq!(client.send(CreditRequest::Unbounded), Ok(0));
    assert_eq!(client.outgoing(), 7);

    let link = client.link_to(&fixture.address()).unwrap();
    assert_eq!(client.link_stats(link).unwrap().peer_credit, 0);
    assert_eq!(fixture.server.link_stats(link).unwrap().backlog, 4);

    // Draining the backlog lets the client continue
    assert_eq!(fixture.server.recv(CreditRequest::Unbounded), Ok(4));
    assert_eq!(client.send(CreditRequest::Unbounded), Ok(4));

    // A single free slot is not worth a Flow frame yet
    assert_eq!(fixture.server.recv(CreditRequest::Exact(1)), Ok(1));
    assert_eq!(client.send(CreditRequest::Unbounded), Ok(0));

    assert_eq!(fixture.server.recv(CreditRequest::Unbounded), Ok(3));
    assert_eq!(client.send(CreditRequest::Unbounded), Ok(3));
    assert_eq!(client.outgoing(), 0);
    assert_eq!(fixture.server.link_stats(link).unwrap().backlog, 3);
}

// ============================================================================
// Vanished Peers
// ============================================================================

#[test]
fn test_awol_client_leaves_server_bounded() {
    init_tracing();
    let fixture = RequestReplyFixture::new();
    let awol = fixture.client();
    fixture.request(&awol, "request from awol");

    // Ten replies to a single request
    fixture.server.recv(CreditRequest::Unbounded).unwrap();
    let mut request = Message::default();
    fixture.server.get(&mut request).unwrap();
    let reply_to = request.reply_to().unwrap().to_string();
    let replies: Vec<_> = (0..10)
        .map(|a| {
            fixture
                .server
                .put(&Message::new(&reply_to).with_text(format!("reply {a} for awol ").repeat(10)))
                .unwrap()
        })
        .collect();
    fixture.server.accept();
    assert_eq!(fixture.server.send(CreditRequest::Unbounded), Ok(10));
    assert!(fixture.server.take_auto_settled().is_empty());

    // The client takes three and vanishes
    assert_eq!(awol.recv(CreditRequest::Unbounded), Ok(10));
    let mut reply = Message::default();
    for _ in 0..3 {
        awol.get(&mut reply).unwrap();
        awol.accept();
    }
    fixture.net.crash(awol.name());
    drop(awol);

    let unresolved = fixture.server.unresolved();
    assert_eq!(unresolved, replies[3..].to_vec());
    assert!(fixture.server.links().is_empty());
    for handle in &replies[..3] {
        assert_eq!(fixture.server.status(*handle), Some(DeliveryState::Settled));
    }
    assert_eq!(
        fixture.server.disposition(replies[5]),
        Err(MessengerError::UnknownDeliveryOutcome(replies[5]))
    );

    for handle in unresolved {
        assert!(fixture.server.settle(handle));
    }
    assert!(fixture.server.unresolved().is_empty());

    // Fresh clients are still served
    for i in 0..5 {
        let client = fixture.client();
        fixture.request(&client, &format!("message {i} from client"));
        assert_eq!(fixture.serve().len(), 1);
        let reply = fixture.take_reply(&client).expect("reply");
        assert_eq!(
            reply.body_text(),
            Some(format!("reply to message {i} from client"))
        );
    }
}

#[test]
fn test_disconnect_only_affects_its_link() {
    let fixture = RequestReplyFixture::new();
    let stays = fixture.client();
    let leaves = fixture.client();

    fixture.request(&stays, "from stays");
    fixture.request(&leaves, "from leaves");

    fixture.server.recv(CreditRequest::Unbounded).unwrap();
    let mut request = Message::default();
    let mut replies = Vec::new();
    while fixture.server.get(&mut request).is_ok() {
        let reply = Message::new(request.reply_to().unwrap())
            .with_text(format!("reply to {}", request.body_text().unwrap()));
        replies.push(fixture.server.put(&reply).unwrap());
        fixture.server.accept();
    }
    assert_eq!(replies.len(), 2);

    fixture.net.crash(leaves.name());

    // The reply to the vanished client aborts, the other one goes out
    assert_eq!(fixture.server.send(CreditRequest::Unbounded), Ok(1));
    assert_eq!(fixture.server.status(replies[1]), Some(DeliveryState::Aborted));
    assert_eq!(fixture.server.unresolved(), vec![replies[1]]);
    assert_eq!(fixture.server.links().len(), 1);

    let reply = fixture.take_reply(&stays).expect("reply");
    assert_eq!(reply.body_text().as_deref(), Some("reply to from stays"));
}

#[test]
fn test_close_reclaims_unresolved_requests() {
    let fixture = RequestReplyFixture::new();
    let client = fixture.client();
    let request = fixture.request(&client, "never answered");

    client.close();
    assert!(!client.is_started());
    assert!(client.links().is_empty());
    assert_eq!(client.status(request), Some(DeliveryState::UnknownOutcome));
    assert_eq!(client.unresolved(), vec![request]);

    // The server drops the unread transfer along with the link
    assert_eq!(fixture.server.recv(CreditRequest::Unbounded), Ok(0));
    assert!(fixture.server.links().is_empty());
}

// ============================================================================
// Lifecycle
// ============================================================================

#[test]
fn test_stop_buffers_until_restart() {
    let fixture = RequestReplyFixture::new();
    let client = fixture.client();
    client.stop();

    let handle = client
        .put(&Message::new(fixture.address()).with_text("later"))
        .unwrap();
    assert!(matches!(
        client.send(CreditRequest::Unbounded),
        Err(MessengerError::InvalidState(_))
    ));
    assert_eq!(client.outgoing(), 1);
    assert_eq!(client.status(handle), Some(DeliveryState::Pending));

    client.start().unwrap();
    assert_eq!(client.send(CreditRequest::Unbounded), Ok(1));
    assert_eq!(client.status(handle), Some(DeliveryState::Sent));
}

#[test]
fn test_link_stats_track_frames() {
    let fixture = RequestReplyFixture::new();
    let client = fixture.client();
    fixture.request(&client, "ping");
    fixture.serve();
    fixture.take_reply(&client).expect("reply");

    let link = client.link_to(&fixture.address()).unwrap();
    let stats = client.link_stats(link).unwrap();
    assert_eq!(stats.peer, fixture.address());
    // request and disposition of the reply out; disposition of the request and reply in
    assert_eq!(stats.frames_sent, 2);
    assert_eq!(stats.frames_received, 2);
    assert_eq!(stats.unsettled_incoming, 0);
    assert_eq!(stats.backlog, 0);
    assert_eq!(stats.peer_credit, DEFAULT_LINK_CREDIT - 1);

    // The transport counts the same frames from its side
    let transport = client.transport_stats();
    assert_eq!(transport.frames_sent, 2);
    assert_eq!(transport.frames_received, 2);
    assert!(transport.bytes_received > 0);
    assert_eq!(
        fixture.server.transport_stats().bytes_received,
        transport.bytes_sent
    );
}

// ============================================================================
// Concurrency
// ============================================================================

#[test]
fn test_disconnect_racing_settle() {
    const REPLIES: usize = 40;

    let fixture = RequestReplyFixture::with_config(EndpointConfig::named("server"));
    let client = fixture.client();
    fixture.request(&client, "flood me");

    fixture.server.recv(CreditRequest::Unbounded).unwrap();
    let mut request = Message::default();
    fixture.server.get(&mut request).unwrap();
    fixture.server.accept();
    let reply_to = request.reply_to().unwrap().to_string();
    let replies: Vec<_> = (0..REPLIES)
        .map(|i| {
            fixture
                .server
                .put(&Message::new(&reply_to).with_text(format!("reply {i}")))
                .unwrap()
        })
        .collect();
    assert_eq!(fixture.server.send(CreditRequest::Unbounded), Ok(REPLIES));
    let link = fixture.server.links()[0];

    let server = Arc::new(fixture.server);
    let net = fixture.net;
    let (settled_by_app, left_open): (Vec<_>, Vec<_>) =
        replies.iter().copied().partition(|h| h.id() % 2 == 0);

    // The application settles half the replies while the client vanishes
    let settling = {
        let server = Arc::clone(&server);
        let targets = settled_by_app.clone();
        thread::spawn(move || {
            let mut settled = 0;
            for _ in 0..2 {
                for &handle in &targets {
                    if server.settle(handle) {
                        settled += 1;
                    }
                    thread::yield_now();
                }
            }
            settled
        })
    };
    let crashing = {
        let server = Arc::clone(&server);
        let name = client.name().to_string();
        thread::spawn(move || {
            net.crash(&name);
            server.process_events();
        })
    };

    crashing.join().unwrap();
    // Each handle settled exactly once, before or after the link was reclaimed
    assert_eq!(settling.join().unwrap(), settled_by_app.len());

    for handle in &settled_by_app {
        assert_eq!(server.status(*handle), Some(DeliveryState::Settled));
    }
    for handle in &left_open {
        assert_eq!(server.status(*handle), Some(DeliveryState::UnknownOutcome));
    }
    assert!(server.peek(link, Direction::Outgoing).is_empty());
    assert!(server.links().is_empty());

    assert_eq!(server.unresolved(), left_open);
    for handle in &left_open {
        assert!(server.settle(*handle));
        assert!(!server.settle(*handle));
    }
    assert!(server.unresolved().is_empty());
}

#[test]
fn test_concurrent_clients() {
    const CLIENTS: usize = 4;
    const REQUESTS: usize = 25;

    let fixture = RequestReplyFixture::new();
    let server = Arc::new(fixture.server);
    let net = fixture.net;
    let address = server.address().to_string();

    let serving = {
        let server = Arc::clone(&server);
        thread::spawn(move || {
            let mut handled = 0;
            let mut outstanding = std::collections::VecDeque::new();
            let mut request = Message::default();
            while handled < CLIENTS * REQUESTS {
                server.recv(CreditRequest::Unbounded).unwrap();
                while server.get(&mut request).is_ok() {
                    let reply = Message::new(request.reply_to().unwrap())
                        .with_text(format!("reply to {}", request.body_text().unwrap()));
                    outstanding.push_back(server.put(&reply).unwrap());
                    server.accept();
                    handled += 1;
                }
                server.send(CreditRequest::Unbounded).unwrap();
                while outstanding.len() > 10 {
                    let oldest = outstanding.pop_front().unwrap();
                    server.settle(oldest);
                }
                thread::yield_now();
            }
            handled
        })
    };

    let clients: Vec<_> = (0..CLIENTS)
        .map(|c| {
            let client = Endpoint::on_memory(&net, EndpointConfig::default()).unwrap();
            client.start().unwrap();
            let address = address.clone();
            thread::spawn(move || {
                for r in 0..REQUESTS {
                    let body = format!("client {c} request {r}");
                    client
                        .put(
                            &Message::new(&address)
                                .with_text(body.as_str())
                                .with_reply_to("~"),
                        )
                        .unwrap();
                    assert_eq!(client.send(CreditRequest::Exact(1)).unwrap(), 1);

                    let reply = recv_one(&client, CreditRequest::Exact(1), default_deadline())
                        .expect("reply before deadline");
                    client.accept();
                    assert_eq!(reply.body_text(), Some(format!("reply to {body}")));
                }
            })
        })
        .collect();

    for client in clients {
        client.join().unwrap();
    }
    assert_eq!(serving.join().unwrap(), CLIENTS * REQUESTS);
}
