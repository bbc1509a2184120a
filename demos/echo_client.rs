//! Echo client: send a line, print the echo, repeat.
//!
//! Run with:
//!
//! ```sh
//! cargo run --example echo_client
//! ```

use websock::{connect, Message};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().init();

    let mut ws = connect("ws://127.0.0.1:8000/").await?;

    for line in ["Hello, world!", "still here?", "bye"] {
        ws.send(Message::text(line)).await?;
        match ws.recv().await {
            Some(echo) => println!("echo: {echo:?}"),
            None => {
                println!("connection closed: {:?}", ws.close_code());
                return Ok(());
            }
        }
    }

    ws.close(1000, "done").await?;
    Ok(())
}
