use gestion::config::Settings;
use gestion::{app, login};
use std::env;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = env::args().collect();

    // `gestion-dashboard hash-password <password>` prints a hash for the
    // principal directory and exits.
    if args.get(1).map(String::as_str) == Some("hash-password") {
        let Some(password) = args.get(2) else {
            eprintln!("usage: {} hash-password <password>", args[0]);
            std::process::exit(2);
        };
        println!("{}", login::hash_password(password)?);
        return Ok(());
    }

    let settings = Settings::load()?;
    app::run(settings).await?;

    Ok(())
}
