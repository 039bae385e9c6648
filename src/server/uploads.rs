use std::time::Instant;

use tokio::sync::{Mutex, Semaphore};

/// Hard cap on queued file-transfer jobs.
pub const MAX_UPLOAD_QUEUE: usize = 5;
/// Largest accepted file size in bytes (3 MiB).
pub const MAX_FILE_SIZE: u64 = 3 * 1024 * 1024;

/// One unit of work for the transfer worker. The payload itself is never
/// carried; delivery ends in a notification to the receiver.
#[derive(Debug, Clone)]
pub struct FileTransfer {
    pub filename: String,
    pub sender: String,
    pub receiver: String,
    pub size: u64,
    pub queued_at: Instant,
}

struct Ring {
    jobs: [Option<FileTransfer>; MAX_UPLOAD_QUEUE],
    front: usize,
    rear: usize,
    count: usize,
}

/// Bounded FIFO with slot/item flow control. Producers take a `slots`
/// permit before writing, the single consumer takes an `items` permit
/// before reading, and exactly one `slots` permit is posted back per
/// consumed job. The mutex only covers the index bookkeeping; nothing
/// blocks while it is held.
pub struct UploadQueue {
    ring: Mutex<Ring>,
    slots: Semaphore,
    items: Semaphore,
}

impl UploadQueue {
    pub fn new() -> UploadQueue {
        UploadQueue {
            ring: Mutex::new(Ring {
                jobs: [None, None, None, None, None],
                front: 0,
                rear: 0,
                count: 0,
            }),
            slots: Semaphore::new(MAX_UPLOAD_QUEUE),
            items: Semaphore::new(0),
        }
    }

    /// Non-blocking attempt to take a producer slot.
    pub fn try_reserve(&self) -> bool {
        match self.slots.try_acquire() {
            Ok(permit) => {
                permit.forget();
                true
            }
            Err(_) => false,
        }
    }

    /// Waits until a producer slot frees up, then takes it.
    pub async fn reserve(&self) {
        self.slots.acquire().await.expect("slots semaphore closed").forget();
    }

    /// Writes a job into the ring. The caller must hold a reserved slot.
    /// Returns the queue depth after the write.
    pub async fn push(&self, job: FileTransfer) -> usize {
        let depth = {
            let mut ring = self.ring.lock().await;
            let rear = ring.rear;
            ring.jobs[rear] = Some(job);
            ring.rear = (rear + 1) % MAX_UPLOAD_QUEUE;
            ring.count += 1;
            ring.count
        };
        self.items.add_permits(1);
        depth
    }

    /// Takes the oldest queued job, waiting for one if the queue is empty.
    pub async fn take(&self) -> FileTransfer {
        self.items.acquire().await.expect("items semaphore closed").forget();
        let mut ring = self.ring.lock().await;
        let front = ring.front;
        let job = ring.jobs[front].take().expect("item permit without a queued job");
        ring.front = (front + 1) % MAX_UPLOAD_QUEUE;
        ring.count -= 1;
        job
    }

    /// Posts the consumer's slot permit once a job is fully processed.
    pub fn release_slot(&self) {
        self.slots.add_permits(1);
    }

    /// Current number of queued jobs.
    pub async fn depth(&self) -> usize {
        self.ring.lock().await.count
    }

    #[cfg(test)]
    pub(crate) fn free_slots(&self) -> usize {
        self.slots.available_permits()
    }

    #[cfg(test)]
    pub(crate) fn pending_items(&self) -> usize {
        self.items.available_permits()
    }
}
