//! `PubSub` service backed by an [`EventBus`]

use super::proto::pub_sub_server::PubSub;
use super::proto::{
    Event as WireEvent, HistoryRequest, HistoryResponse, PublishRequest, StoredEvent,
    SubscribeRequest,
};
use crate::bus::EventBus;
use crate::gateway::DeliveryStream;
use crate::logging::CallTimer;
use crate::types::Event;
use futures::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};
use tonic::{Request, Response, Status};

/// Translates RPCs into bus calls and bus errors into status codes
#[derive(Clone)]
pub struct PubSubService {
    bus: EventBus,
}

impl PubSubService {
    pub fn new(bus: EventBus) -> Self {
        Self { bus }
    }
}

#[tonic::async_trait]
impl PubSub for PubSubService {
    async fn publish(&self, request: Request<PublishRequest>) -> Result<Response<()>, Status> {
        let req = request.into_inner();
        let timer = CallTimer::start("Publish", &req.key);

        let result = self
            .bus
            .publish(&req.key, &req.data)
            .await
            .map(|_| Response::new(()))
            .map_err(Status::from);

        timer.finish(&result);
        result
    }

    type SubscribeStream = EventStream;

    async fn subscribe(
        &self,
        request: Request<SubscribeRequest>,
    ) -> Result<Response<Self::SubscribeStream>, Status> {
        let req = request.into_inner();
        let timer = CallTimer::start("Subscribe", &req.key);

        match self.bus.open_stream(&req.key) {
            Ok(inner) => Ok(Response::new(EventStream {
                inner,
                timer: Some(timer),
                delivered: 0,
            })),
            Err(e) => {
                let status = Status::from(e);
                timer.finish::<()>(&Err(status.clone()));
                Err(status)
            }
        }
    }

    async fn history(
        &self,
        request: Request<HistoryRequest>,
    ) -> Result<Response<HistoryResponse>, Status> {
        let req = request.into_inner();
        let timer = CallTimer::start("History", &req.key);

        let result = self
            .bus
            .history(&req.key)
            .await
            .map(|events| {
                Response::new(HistoryResponse {
                    events: events.into_iter().map(StoredEvent::from).collect(),
                })
            })
            .map_err(Status::from);

        timer.finish(&result);
        result
    }
}

impl From<Event> for StoredEvent {
    fn from(event: Event) -> Self {
        Self {
            timestamp_ms: event.timestamp_millis(),
            id: event.id,
            key: event.key,
            data: event.data,
        }
    }
}

/// Server stream for one `Subscribe` call
///
/// Ends without error when the broker or gateway shuts down. Dropping it,
/// which tonic does when the client goes away, deregisters the subscriber.
pub struct EventStream {
    inner: DeliveryStream,
    timer: Option<CallTimer>,
    delivered: u64,
}

impl Stream for EventStream {
    type Item = Result<WireEvent, Status>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match Pin::new(&mut self.inner).poll_next(cx) {
            Poll::Ready(Some(event)) => {
                self.delivered += 1;
                Poll::Ready(Some(Ok(WireEvent { data: event.data })))
            }
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.finish_stream(self.delivered);
        }
    }
}
