//! Server-sent stream of registry snapshots: the current snapshot is
//! emitted immediately on subscribe, then one event per change, latest
//! state winning over any the client has not consumed.

use futures::StreamExt;
use std::convert::Infallible;
use std::sync::Arc;
use tokio_stream::wrappers::WatchStream;
use warp::{Filter, Rejection, Reply};

use crate::plugin::Manager;
use crate::registry::Snapshot;

pub fn route(
    manager: Arc<Manager>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path!("mcp" / "stream")
        .and(warp::get())
        .and(warp::any().map(move || manager.clone()))
        .map(|manager: Arc<Manager>| {
            let rx = manager.registry().subscribe();
            let initial: Snapshot = rx.borrow().clone();

            let events = futures::stream::once(futures::future::ready(initial))
                .chain(WatchStream::from_changes(rx))
                .map(|snapshot| {
                    let data = serde_json::to_string(&snapshot).unwrap_or_else(|_| "[]".into());
                    Ok::<_, Infallible>(warp::sse::Event::default().data(data))
                });

            warp::sse::reply(warp::sse::keep_alive().stream(events))
        })
}
