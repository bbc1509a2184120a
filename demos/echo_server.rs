//! Echo server: send back every message received from a client.
//!
//! Run with:
//!
//! ```sh
//! cargo run --example echo_server
//! ```

use websock::serve;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,websock=debug".into()),
        )
        .init();

    let handle = serve(
        |mut ws| async move {
            while let Some(msg) = ws.recv().await {
                if ws.send(msg).await.is_err() {
                    break;
                }
            }
        },
        "127.0.0.1",
        8000,
    )
    .await?;

    println!("echo server listening on ws://{}", handle.local_addr());
    handle.closed().await;
    Ok(())
}
