//! Minimal IKEv2 client: establish an IKE SA + Child SA against a gateway,
//! print the negotiated parameters, then tear the SA down.
//!
//! Usage:
//!
//! ```text
//! cargo run --example ike_client -- 203.0.113.1:500 my-psk
//! ```

use std::time::Duration;

use ikepeer_proto::ike::config::SessionConfig;
use ikepeer_proto::ike::payload::IkeIdentification;
use ikepeer_proto::ike::session::IkeSession;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let mut args = std::env::args().skip(1);
    let peer = args
        .next()
        .ok_or("usage: ike_client <gateway-addr:port> <psk>")?;
    let psk = args.next().ok_or("usage: ike_client <gateway-addr:port> <psk>")?;

    let config = SessionConfig::builder()
        .with_local_id(IkeIdentification::fqdn("client.example.com")?)
        .with_psk(psk.into_bytes())
        .with_internal_address_request()
        .build()?;

    let mut session = IkeSession::new(config);
    session.connect(peer.parse()?).await?;

    println!("IKE SA established, state: {:?}", session.state());
    if let Some(address) = session.internal_address() {
        println!("internal address: {}", address);
    }
    for (spi, child) in session.child_sas() {
        println!(
            "child SA 0x{:08x}: outbound SPI 0x{:08x}, {} selectors",
            spi,
            u32::from_be_bytes(child.outbound_spi),
            child.local_ts.len()
        );
    }

    // Answer gateway traffic (DPD probes etc.) for a little while.
    for _ in 0..5 {
        let event = session.recv_and_handle(Duration::from_secs(1)).await?;
        println!("event: {:?}", event);
    }

    session.close().await?;
    println!("closed");
    Ok(())
}
