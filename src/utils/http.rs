use once_cell::sync::Lazy;
use reqwest::Client;
use std::time::Duration;

static HTTP_CLIENT: Lazy<Client> = Lazy::new(|| {
    Client::builder()
        .timeout(Duration::from_secs(30))
        .connect_timeout(Duration::from_secs(10))
        .user_agent(concat!("mushroom-expert-bot/", env!("CARGO_PKG_VERSION")))
        .build()
        .expect("Failed to build HTTP client")
});

pub fn get_http_client() -> &'static Client {
    &HTTP_CLIENT
}
