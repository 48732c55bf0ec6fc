//! Interactive login against a live PseudOIDC tenant.
//! Run with: `cargo run --example login` (reads PSEUDOIDC_* from the environment or `.env`)

use std::io::{self, BufRead, Write};
use std::sync::Arc;

use pseudoidc_oauth::{
    AuthorizationRequestBuilder, CallbackController, CallbackParams, InMemorySessionSink, InMemoryStateStore,
    PseudoidcConfig, ReqwestHttpClient,
};
use tracing_subscriber::EnvFilter;
use url::Url;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = PseudoidcConfig::from_env()?;
    let http = Arc::new(ReqwestHttpClient::new()?);
    let descriptor = Arc::new(config.load_descriptor(http.as_ref()).await?);

    let store = Arc::new(InMemoryStateStore::new());
    let redirect = AuthorizationRequestBuilder::new(descriptor.clone())
        .initiate(store.as_ref(), None)
        .await?;
    println!("Open this URL in a browser:\n\n  {}\n", redirect.url);
    print!("Paste the full callback URL: ");
    io::stdout().flush()?;

    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    let callback = Url::parse(line.trim())?;

    let controller = CallbackController::new(descriptor, http, store);
    let sink = InMemorySessionSink::new();
    match controller
        .handle_and_persist(&redirect.session_key, CallbackParams::from_url(&callback), &sink)
        .await
    {
        Ok(session) => println!("Signed in as pseudonym {}", session.pseudonym),
        Err(failure) => {
            let response = failure.to_response();
            println!("HTTP {} {}", response.status, response.body);
        }
    }
    Ok(())
}
