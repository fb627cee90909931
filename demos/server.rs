use echoprobe::{Config, Mode, Server};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    println!("Starting echoprobe responder on port 6969...");

    let config = Config::server(6969).with_mode(Mode::Responder);

    let server = Server::new(config)?;
    server.run().await?;

    Ok(())
}
