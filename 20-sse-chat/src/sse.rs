use std::{
    convert::Infallible,
    pin::Pin,
    task::{Context, Poll},
};

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use futures_util::{Stream, StreamExt};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{info, warn};

use crate::{
    hub::{DeliveryError, Hub, Subscription, SubscriptionId},
    message::{to_event, Message},
    routes::AppState,
};

/// One connected event-stream client.
///
/// Owns the receiving end of a bounded queue that the hub handler feeds with
/// `try_send`, so a slow client never stalls fan-out to the others. Owning
/// the [`Subscription`] ties the hub registration to the response body:
/// whenever the body is dropped the subscriber is removed.
pub struct SubscriberStream {
    receiver: mpsc::Receiver<Message>,
    subscription: Subscription,
}

impl SubscriberStream {
    pub fn register(hub: &Hub, capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let subscription = hub.subscription(move |message: &Message| {
            match sender.try_send(message.clone()) {
                Ok(()) => Ok(()),
                // A full queue costs this client one message, not its slot.
                Err(TrySendError::Full(dropped)) => {
                    warn!(bytes = dropped.as_str().len(), "subscriber queue full; message dropped");
                    Ok(())
                }
                Err(TrySendError::Closed(_)) => Err(DeliveryError::Disconnected),
            }
        });

        Self {
            receiver,
            subscription,
        }
    }

    pub fn id(&self) -> SubscriptionId {
        self.subscription.id()
    }
}

impl Stream for SubscriberStream {
    type Item = Message;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

impl Drop for SubscriberStream {
    fn drop(&mut self) {
        info!(subscription = %self.id(), "event stream closed");
    }
}

/// `GET /sse`: streams every message published after the client connected.
pub async fn subscribe(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = SubscriberStream::register(&state.hub, state.config.subscriber_buffer);
    info!(subscription = %stream.id(), "event stream opened");

    let events = stream.map(|message| Ok(to_event(&message)));
    Sse::new(events).keep_alive(KeepAlive::new().interval(state.config.keep_alive))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::{
        body::{Body, BodyDataStream},
        http::{header, Request, StatusCode},
    };
    use tokio::time::timeout;
    use tower::ServiceExt;

    use super::*;
    use crate::{message::SseDecoder, routes::router, server::ServerConfig};

    const READ_TIMEOUT: Duration = Duration::from_secs(1);

    async fn open_stream(hub: &Hub) -> BodyDataStream {
        let response = router(hub.clone(), ServerConfig::default())
            .oneshot(Request::get("/sse").body(Body::empty()).expect("request"))
            .await
            .expect("sse response");

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/event-stream");
        response.into_body().into_data_stream()
    }

    async fn next_frame(body: &mut BodyDataStream) -> String {
        let bytes = timeout(READ_TIMEOUT, body.next())
            .await
            .expect("frame before timeout")
            .expect("stream still open")
            .expect("frame bytes");
        String::from_utf8(bytes.to_vec()).expect("utf-8 frame")
    }

    #[tokio::test]
    async fn streams_published_messages_as_data_events() {
        let hub = Hub::new();
        let mut body = open_stream(&hub).await;
        assert_eq!(hub.subscriber_count(), 1);

        assert_eq!(hub.publish("hello"), 1);
        assert_eq!(next_frame(&mut body).await, "data: hello\n\n");

        hub.publish("world");
        assert_eq!(next_frame(&mut body).await, "data: world\n\n");
    }

    #[tokio::test]
    async fn dropping_the_body_unsubscribes() {
        let hub = Hub::new();
        let body = open_stream(&hub).await;
        assert_eq!(hub.subscriber_count(), 1);

        drop(body);
        assert_eq!(hub.subscriber_count(), 0);
        assert_eq!(hub.publish("after disconnect"), 0);
    }

    #[tokio::test]
    async fn no_backlog_is_replayed_on_connect() {
        let hub = Hub::new();
        hub.publish("too early");

        let mut body = open_stream(&hub).await;
        hub.publish("fresh");
        assert_eq!(next_frame(&mut body).await, "data: fresh\n\n");
    }

    #[tokio::test]
    async fn multiline_messages_survive_framing() {
        let hub = Hub::new();
        let mut body = open_stream(&hub).await;
        hub.publish("first line\r\nsecond line");

        let mut decoder = SseDecoder::new();
        let mut received = Vec::new();
        while received.is_empty() {
            received = decoder.push(next_frame(&mut body).await.as_bytes());
        }
        assert_eq!(received, vec![Message::from("first line\nsecond line")]);
    }

    #[tokio::test]
    async fn full_queue_drops_message_but_keeps_subscriber() {
        let hub = Hub::new();
        let mut stream = SubscriberStream::register(&hub, 1);

        hub.publish("kept");
        hub.publish("dropped");
        assert_eq!(hub.subscriber_count(), 1);

        assert_eq!(stream.next().await, Some(Message::from("kept")));
        hub.publish("next");
        assert_eq!(stream.next().await, Some(Message::from("next")));
    }

    #[tokio::test]
    async fn closing_the_hub_ends_the_stream() {
        let hub = Hub::new();
        let mut stream = SubscriberStream::register(&hub, 4);

        hub.publish("last");
        hub.close();

        assert_eq!(stream.next().await, Some(Message::from("last")));
        assert_eq!(stream.next().await, None);
    }

    #[tokio::test]
    async fn stream_opened_after_close_ends_immediately() {
        let hub = Hub::new();
        hub.close();

        let mut stream = SubscriberStream::register(&hub, 4);
        assert_eq!(hub.subscriber_count(), 0);
        assert_eq!(
            timeout(READ_TIMEOUT, stream.next()).await.expect("ends before timeout"),
            None
        );

        let mut body = open_stream(&hub).await;
        let end = timeout(READ_TIMEOUT, body.next())
            .await
            .expect("body ends before timeout");
        assert!(end.is_none());
    }
}
