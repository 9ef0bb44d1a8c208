//! Write-once slots.
//!
//! Headers and the response-start decision are produced exactly once per
//! call and awaited by the other side. A slot is a `watch` channel whose
//! value transitions `None -> Some` at most once; readers suspend until
//! the write or until the writer is dropped.

use std::sync::Arc;

use tokio::sync::watch;

/// Create a connected writer/reader pair for one slot.
pub(crate) fn slot<T>() -> (SlotWriter<T>, SlotReader<T>) {
    let (tx, rx) = watch::channel(None);
    (SlotWriter { tx }, SlotReader { rx })
}

/// Write half of a slot.
#[derive(Debug)]
pub(crate) struct SlotWriter<T> {
    tx: watch::Sender<Option<Arc<T>>>,
}

impl<T> SlotWriter<T> {
    /// Write the value. Returns `false` (and drops `value`) if the slot
    /// was already written; this is the compare-and-set the response
    /// initiation latch is built on.
    pub fn set(&self, value: T) -> bool {
        self.tx.send_if_modified(|slot| {
            if slot.is_some() {
                false
            } else {
                *slot = Some(Arc::new(value));
                true
            }
        })
    }

    /// Whether the slot has been written.
    pub fn is_set(&self) -> bool {
        self.tx.borrow().is_some()
    }
}

/// Read half of a slot.
#[derive(Debug)]
pub(crate) struct SlotReader<T> {
    rx: watch::Receiver<Option<Arc<T>>>,
}

impl<T> SlotReader<T> {
    /// Wait for the value. `None` means the writer was dropped without
    /// ever writing.
    pub async fn get(&mut self) -> Option<Arc<T>> {
        match self.rx.wait_for(Option::is_some).await {
            Ok(value) => value.clone(),
            Err(_) => None,
        }
    }

    /// The value, if already written.
    pub fn try_get(&self) -> Option<Arc<T>> {
        self.rx.borrow().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_once() {
        let (writer, reader) = slot();
        assert!(!writer.is_set());
        assert!(writer.set(1));
        assert!(writer.is_set());
        assert!(!writer.set(2));
        assert_eq!(*reader.try_get().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_reader_waits_for_write() {
        let (writer, mut reader) = slot();

        let task = tokio::spawn(async move { reader.get().await.map(|v| *v) });
        tokio::task::yield_now().await;
        assert!(writer.set("headers"));

        assert_eq!(task.await.unwrap(), Some("headers"));
    }

    #[tokio::test]
    async fn test_dropped_writer_yields_none() {
        let (writer, mut reader) = slot::<u32>();
        drop(writer);
        assert_eq!(reader.get().await, None);
    }

    #[tokio::test]
    async fn test_value_set_before_drop_survives() {
        let (writer, mut reader) = slot();
        writer.set(7);
        drop(writer);
        assert_eq!(reader.get().await.map(|v| *v), Some(7));
    }
}
