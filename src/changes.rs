//! Change notifications for committed mutations.
//!
//! Every successful mutation publishes one [`GalleryChange`] after its
//! transaction commits and its cache entries are evicted. Rolled-back or
//! cancelled mutations, and calls that had nothing to do, publish nothing.
//!
//! Subscribers either hold a raw `broadcast::Receiver` or a
//! [`GalleryChangeStream`], which can be narrowed to a set of image ids.

use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use tokio::sync::broadcast;
use tokio_stream::Stream;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tracing::{trace, warn};

/// What a committed mutation did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
   /// Images were inserted, refreshed or resurrected.
   ImagesUpserted,
   /// Images were soft-deleted.
   ImagesDeleted,
   /// An image's metadata was replaced.
   MetadataReplaced,
   /// A tag was added to or removed from an image.
   TagsChanged,
   /// An image's favorite flag flipped; carries the new state.
   FavoriteToggled { is_favorite: bool },
}

/// Notification of a committed change to one or more images.
#[derive(Debug, Clone)]
pub struct GalleryChange {
   pub kind: ChangeKind,
   pub image_ids: Vec<i64>,
   pub timestamp: Instant,
}

/// Item yielded by [`GalleryChangeStream`].
#[derive(Debug, Clone)]
pub enum ChangeEvent {
   Change(GalleryChange),
   /// The subscriber fell behind and this many notifications were dropped.
   /// Anything it derived from earlier notifications should be reloaded.
   Lagged(u64),
}

pub(crate) struct ChangeBroker {
   sender: broadcast::Sender<GalleryChange>,
}

impl ChangeBroker {
   pub fn new(capacity: usize) -> Self {
      let (sender, _) = broadcast::channel(capacity.max(1));
      Self { sender }
   }

   pub fn publish(&self, kind: ChangeKind, image_ids: Vec<i64>) {
      if image_ids.is_empty() {
         return;
      }

      let change = GalleryChange {
         kind,
         image_ids,
         timestamp: Instant::now(),
      };

      // No receivers is not an error: nobody is listening right now.
      match self.sender.send(change) {
         Ok(receivers) => trace!(?kind, receivers, "Published gallery change"),
         Err(_) => trace!(?kind, "Gallery change dropped, no subscribers"),
      }
   }

   pub fn subscribe(&self) -> broadcast::Receiver<GalleryChange> {
      self.sender.subscribe()
   }
}

/// A stream of change notifications, optionally limited to some images.
///
/// Wraps a `BroadcastStream`, so waiting for the next change uses proper
/// async wakeups instead of polling.
pub struct GalleryChangeStream {
   inner: BroadcastStream<GalleryChange>,
   filter_images: Option<Vec<i64>>,
}

impl GalleryChangeStream {
   pub(crate) fn new(rx: broadcast::Receiver<GalleryChange>) -> Self {
      Self {
         inner: BroadcastStream::new(rx),
         filter_images: None,
      }
   }

   /// Only yield changes touching at least one of `image_ids`. Lag events are
   /// always yielded.
   pub fn filter_images(mut self, image_ids: Vec<i64>) -> Self {
      self.filter_images = Some(image_ids);
      self
   }
}

impl Stream for GalleryChangeStream {
   type Item = ChangeEvent;

   fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
      loop {
         // BroadcastStream is Unpin, so we can safely create a pinned reference
         let inner = Pin::new(&mut self.inner);

         match inner.poll_next(cx) {
            Poll::Ready(Some(Ok(change))) => {
               if let Some(ref wanted) = self.filter_images
                  && !change.image_ids.iter().any(|id| wanted.contains(id))
               {
                  continue;
               }
               return Poll::Ready(Some(ChangeEvent::Change(change)));
            }
            Poll::Ready(Some(Err(BroadcastStreamRecvError::Lagged(count)))) => {
               warn!(
                  missed = count,
                  "Change stream lagged, notifications were dropped. \
                   Consider increasing change_channel_capacity."
               );
               return Poll::Ready(Some(ChangeEvent::Lagged(count)));
            }
            Poll::Ready(None) => return Poll::Ready(None),
            Poll::Pending => return Poll::Pending,
         }
      }
   }
}
