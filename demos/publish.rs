use std::time::Duration;

use qstash::{Message, PublishOptions, Publisher, PublisherConfig};

#[tokio::main]
async fn main() {
    let config = match PublisherConfig::from_env("orders") {
        Ok(config) => config.with_retries(3).with_verbose(true),
        Err(err) => {
            eprintln!("configuration error: {}", err);
            return;
        }
    };

    let publisher = match Publisher::new(config) {
        Ok(publisher) => publisher,
        Err(err) => {
            eprintln!("configuration error: {}", err);
            return;
        }
    };

    let mut message = Message::new(r#"{"id":123}"#);
    let options = PublishOptions::new().with_retries(5);

    match publisher
        .publish_with_delay(&mut message, Duration::from_secs(30), options)
        .await
    {
        Ok(()) => println!("published {}", message.id),
        Err(err) => eprintln!("publish failed: {}", err),
    }
}
