use crate::*;

use coinnet_services::{BanList, Direction};

#[tokio::test]
async fn outbound_connection_is_admitted_by_peer() -> Result<()> {
    let a = Node::spawn(settings()).await?;
    let b = Node::spawn(settings()).await?;

    assert!(a.manager.connect(b.addr));
    wait_until("b to admit a", || b.manager.len() == 1).await?;
    wait_until("both ends open", || a.all_open() && b.all_open()).await?;

    let (_, inbound) = &b.manager.registry().snapshot()[0];
    assert_eq!(inbound.direction(), Direction::Incoming);
    let (endpoint, outbound) = &a.manager.registry().snapshot()[0];
    assert_eq!(*endpoint, b.addr);
    assert_eq!(outbound.direction(), Direction::Outgoing);

    // The dialled address moved to the tried bucket.
    wait_until("address marked connected", || {
        a.addresses
            .get(&b.addr)
            .map(|entry| entry.last_success > 0)
            .unwrap_or(false)
    })
    .await?;
    Ok(())
}

#[tokio::test]
async fn second_connection_from_same_address_is_refused() -> Result<()> {
    let a = Node::spawn(settings()).await?;
    let b = Node::spawn(settings()).await?;
    let c = Node::spawn(settings()).await?;

    assert!(a.manager.connect(b.addr));
    wait_until("b to admit a", || b.manager.len() == 1).await?;

    // c shares a's address (127.0.0.1), so b closes it straight away.
    assert!(c.manager.connect(b.addr));
    wait_until("c's connection to close", || c.all_closed()).await?;
    c.manager.tick();

    assert_eq!(c.manager.len(), 0);
    assert_eq!(b.manager.len(), 1);
    assert!(a.all_open());
    Ok(())
}

#[tokio::test]
async fn banned_address_is_refused_both_ways() -> Result<()> {
    let a = Node::spawn(settings()).await?;
    let b = Node::spawn(settings()).await?;
    b.bans.ban("127.0.0.1".parse()?, 60);

    assert!(a.manager.connect(b.addr));
    wait_until("a's connection to close", || a.all_closed()).await?;
    a.manager.tick();
    assert_eq!(a.manager.len(), 0);
    assert_eq!(b.manager.len(), 0);

    // And b will not dial a banned address either.
    assert!(b.bans.is_address_banned(&a.addr.ip()));
    assert!(!b.manager.connect(a.addr));
    assert!(b.manager.registry().is_empty());
    Ok(())
}

#[tokio::test]
async fn repeated_connect_keeps_one_entry() -> Result<()> {
    let a = Node::spawn(settings()).await?;
    let b = Node::spawn(settings()).await?;

    assert!(a.manager.connect(b.addr));
    assert!(!a.manager.connect(b.addr));
    wait_until("connection open", || a.all_open() && b.manager.len() == 1).await?;
    assert!(!a.manager.connect(b.addr));
    assert_eq!(a.manager.len(), 1);
    Ok(())
}
