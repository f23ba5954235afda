//! Edge cases of the endpoint operations.

use creditline_core::{
    CreditRequest, DeliveryHandle, DeliveryState, Direction, Endpoint, EndpointConfig, Message,
    MessengerError,
};
use creditline_integration_tests::fixtures::RequestReplyFixture;

// ============================================================================
// Put
// ============================================================================

#[test]
fn test_put_without_address() {
    let fixture = RequestReplyFixture::new();
    let client = fixture.client();

    let result = client.put(&Message::default().with_text("lost"));
    assert!(matches!(result, Err(MessengerError::InvalidAddress(_))));
    assert_eq!(client.outgoing(), 0);
}

#[test]
fn test_put_malformed_address() {
    let fixture = RequestReplyFixture::new();
    let client = fixture.client();

    let result = client.put(&Message::new("not an address"));
    assert!(matches!(result, Err(MessengerError::InvalidAddress(_))));
}

#[test]
fn test_put_message_too_large() {
    let fixture = RequestReplyFixture::new();
    let mut config = EndpointConfig::default();
    config.max_message_size = 8;
    let client = fixture.client_with(config);

    let result = client.put(&Message::new(fixture.address()).with_body(vec![0u8; 9]));
    assert_eq!(result, Err(MessengerError::MessageTooLarge { size: 9, max: 8 }));

    assert!(client
        .put(&Message::new(fixture.address()).with_body(vec![0u8; 8]))
        .is_ok());
}

#[test]
fn test_unsupported_scheme_aborts_on_send() {
    let fixture = RequestReplyFixture::new();
    let client = fixture.client();

    let handle = client.put(&Message::new("tcp://elsewhere")).unwrap();
    assert_eq!(client.send(CreditRequest::Unbounded), Ok(0));
    assert_eq!(client.status(handle), Some(DeliveryState::Aborted));
    assert_eq!(client.unresolved(), vec![handle]);

    assert!(client.settle(handle));
    assert!(client.unresolved().is_empty());
}

// ============================================================================
// Send / Recv
// ============================================================================

#[test]
fn test_send_with_nothing_buffered() {
    let fixture = RequestReplyFixture::new();
    let client = fixture.client();
    assert_eq!(client.send(CreditRequest::Unbounded), Ok(0));
    assert_eq!(client.send(CreditRequest::Exact(3)), Ok(0));
    assert!(client.links().is_empty());
}

#[test]
fn test_recv_without_links() {
    let fixture = RequestReplyFixture::new();
    assert_eq!(fixture.server.recv(CreditRequest::Unbounded), Ok(0));
    assert_eq!(fixture.server.incoming(), 0);
}

#[test]
fn test_recv_zero_credit_moves_nothing() {
    let fixture = RequestReplyFixture::new();
    let client = fixture.client();
    fixture.request(&client, "waiting");

    assert_eq!(fixture.server.recv(CreditRequest::None), Ok(0));
    let link = fixture.server.links()[0];
    assert_eq!(fixture.server.link_stats(link).unwrap().backlog, 1);

    assert_eq!(fixture.server.recv(CreditRequest::from_signed(1)), Ok(1));
    assert_eq!(fixture.server.link_stats(link).unwrap().backlog, 0);
}

#[test]
fn test_blocked_peer_does_not_hold_back_others() {
    let fixture = RequestReplyFixture::new();
    let other = Endpoint::on_memory(&fixture.net, EndpointConfig::named("other")).unwrap();
    other.start().unwrap();

    let mut config = EndpointConfig::default();
    config.link_credit_cap = Some(1);
    let client = fixture.client_with(config);

    let first = client.put(&Message::new(fixture.address()).with_text("a1")).unwrap();
    let second = client.put(&Message::new(fixture.address()).with_text("a2")).unwrap();
    let third = client.put(&Message::new(other.address()).with_text("b1")).unwrap();

    // One unit per link: a1 and b1 go, a2 waits for the next call
    assert_eq!(client.send(CreditRequest::Exact(5)), Ok(2));
    assert_eq!(client.status(first), Some(DeliveryState::Sent));
    assert_eq!(client.status(second), Some(DeliveryState::Pending));
    assert_eq!(client.status(third), Some(DeliveryState::Sent));
    assert_eq!(client.outgoing(), 1);

    let link = client.link_to(&fixture.address()).unwrap();
    assert!(client.link_stats(link).unwrap().send_blocked);

    assert_eq!(client.send(CreditRequest::Exact(5)), Ok(1));
    assert_eq!(client.status(second), Some(DeliveryState::Sent));
}

#[test]
fn test_operations_require_start() {
    let net = creditline_transport::MemoryNetwork::new();
    let endpoint = Endpoint::on_memory(&net, EndpointConfig::named("idle")).unwrap();

    assert!(matches!(
        endpoint.send(CreditRequest::Unbounded),
        Err(MessengerError::InvalidState(_))
    ));
    assert!(matches!(
        endpoint.recv(CreditRequest::Unbounded),
        Err(MessengerError::InvalidState(_))
    ));
    assert_eq!(
        endpoint.get(&mut Message::default()),
        Err(MessengerError::NoMessageAvailable)
    );
}

// ============================================================================
// Settlement
// ============================================================================

#[test]
fn test_accept_without_get() {
    let fixture = RequestReplyFixture::new();
    assert_eq!(fixture.server.accept(), None);
    assert_eq!(fixture.server.reject(), None);
}

#[test]
fn test_settle_never_issued_handle() {
    let fixture = RequestReplyFixture::new();
    let bogus = DeliveryHandle::new(Direction::Outgoing, 999);
    assert!(!fixture.server.settle(bogus));
    assert_eq!(fixture.server.status(bogus), None);
    assert_eq!(fixture.server.disposition(bogus), Ok(None));
}

#[test]
fn test_settle_twice() {
    let fixture = RequestReplyFixture::new();
    let client = fixture.client();
    let request = fixture.request(&client, "once");

    assert!(client.settle(request));
    assert!(!client.settle(request));
    assert_eq!(client.status(request), Some(DeliveryState::Settled));
}

#[test]
fn test_settle_all_before_beyond_window() {
    let fixture = RequestReplyFixture::new();
    let client = fixture.client();
    fixture.request(&client, "one");
    fixture.request(&client, "two");

    let link = client.link_to(&fixture.address()).unwrap();
    assert_eq!(client.settle_all_before(link, Direction::Outgoing, 10), 2);
    assert!(client.peek(link, Direction::Outgoing).is_empty());
    assert_eq!(client.settle_all_before(link, Direction::Outgoing, 10), 0);
}

#[test]
fn test_handle_disconnect_unknown_link_is_ignored() {
    let fixture = RequestReplyFixture::new();
    let client = fixture.client();
    fixture.request(&client, "still here");

    client.handle_disconnect(creditline_transport::LinkHandle::new(4242));
    assert_eq!(client.links().len(), 1);
}

#[test]
fn test_network_disconnect_of_single_link() {
    let fixture = RequestReplyFixture::new();
    let client = fixture.client();
    let request = fixture.request(&client, "cut off");

    let link = client.link_to(&fixture.address()).unwrap();
    fixture.net.disconnect(link);

    assert_eq!(client.status(request), Some(DeliveryState::UnknownOutcome));
    assert!(client.links().is_empty());
    assert!(fixture.server.links().is_empty());

    // A new request opens a fresh link
    let again = fixture.request(&client, "reconnected");
    assert_ne!(client.link_to(&fixture.address()), Some(link));
    assert_eq!(fixture.serve().len(), 1);
    assert!(fixture.take_reply(&client).is_some());
    assert!(client.disposition(again).unwrap().is_some());
}
