use std::time::Duration;

use httpx::{with_max_idle_conns_per_host, Client, DelayStrategy, Request};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let url = std::env::var("HTTPX_DEMO_URL").unwrap_or_else(|_| "https://example.com/".to_owned());

    let client = Client::new([with_max_idle_conns_per_host(16)]);

    let request = Request::get(&url)
        .with_timeout(Duration::from_secs(5))
        .with_expected_status_codes([200, 204])
        .with_retry(3, Duration::from_millis(200), DelayStrategy::ExponentialBackoff)
        .with_on_retry(|attempt, err| eprintln!("attempt {attempt} failed: {err}"));

    match client.do_request(&request).await {
        Ok(body) => println!("{} bytes from {url}", body.len()),
        Err(err) => {
            for (index, attempt) in err.attempt_errors().iter().enumerate() {
                eprintln!("#{}: {attempt}", index + 1);
            }
            if let Some(body) = err.body() {
                eprintln!("last body: {}", String::from_utf8_lossy(body));
            }
            return Err(err.into());
        }
    }

    Ok(())
}
