use std::time::Duration;

use bytes::Bytes;
use http::{HeaderValue, Request};
use qstash::{sign, Acknowledgement, Message, Receiver, ReceiverConfig};

#[tokio::main]
async fn main() {
    let receiver = Receiver::new(ReceiverConfig::new("sig_current", "sig_next"))
        .expect("both signing keys are set");

    let body = Bytes::from_static(br#"{"id":123}"#);
    let token = sign("sig_next", "https://example.com/webhook", &body, Duration::from_secs(300))
        .expect("token");

    let mut request = Request::new(body);
    request
        .headers_mut()
        .insert("upstash-signature", HeaderValue::from_str(&token).expect("header"));
    request
        .headers_mut()
        .insert("upstash-message-id", HeaderValue::from_static("msg_123"));

    let handler = |message: Message| async move {
        println!("received {} ({} bytes)", message.id, message.body.len());
        Acknowledgement::Ack
    };

    let response = receiver.handle_request(request, &handler).await;
    println!("responding with {}", response.status());
}
