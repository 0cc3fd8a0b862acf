use crate::*;

#[tokio::test]
async fn broadcast_is_delivered_both_ways() -> Result<()> {
    let mut a = Node::spawn(settings()).await?;
    let mut b = Node::spawn(settings()).await?;

    assert!(a.manager.connect(b.addr));
    wait_until("connection open", || a.all_open() && b.all_open()).await?;

    assert_eq!(a.manager.broadcast(Bytes::from_static(b"inv")), 1);
    let (_, payload) = recv_payload(&mut b).await?;
    assert_eq!(&payload[..], b"inv");

    assert_eq!(b.manager.broadcast(Bytes::from_static(b"getdata")), 1);
    let (from, payload) = recv_payload(&mut a).await?;
    assert_eq!(from, b.addr);
    assert_eq!(&payload[..], b"getdata");
    Ok(())
}

#[tokio::test]
async fn stop_clears_registry_and_closes_peers() -> Result<()> {
    let a = Node::spawn(settings()).await?;
    let b = Node::spawn(settings()).await?;

    assert!(a.manager.connect(b.addr));
    wait_until("connection open", || a.all_open() && b.all_open()).await?;

    a.manager.stop();
    assert!(a.manager.registry().is_empty());
    assert!(!a.manager.is_connected());

    wait_until("b to see the close", || b.all_closed()).await?;
    b.manager.tick();
    assert_eq!(b.manager.len(), 0);
    Ok(())
}

#[tokio::test]
async fn maintenance_loop_reports_status() -> Result<()> {
    let b = Node::spawn(settings()).await?;
    let a = Node::spawn(ManagerSettings {
        warmup: Duration::from_millis(10),
        tick_interval: Duration::from_millis(50),
        ..settings()
    })
    .await?;
    a.manager.start();

    wait_until("first status record", || a.status.get("network").is_some()).await?;
    let status = a.status.get("network").context("network status")?;
    assert_eq!(status["value"], "Connecting");
    assert_eq!(status["network.tcp.connections"], "0");

    assert!(a.manager.connect(b.addr));
    wait_until("status to show the peer", || {
        a.status
            .get("network")
            .map(|s| s["value"] == "Connected" && s["network.tcp.connections"] == "1")
            .unwrap_or(false)
    })
    .await?;
    Ok(())
}
