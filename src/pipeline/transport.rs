use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{IntentTransport, TransportError, VoteIntent};

/// In-process transport: one bounded queue per partition, carrying encoded
/// intents. A subject always maps to the same partition, so its intents are
/// applied serially by a single worker.
pub struct ChannelTransport {
    partitions: Vec<mpsc::Sender<Vec<u8>>>,
}

/// Consumer end of one partition.
pub struct PartitionReceiver {
    pub partition: usize,
    rx: mpsc::Receiver<Vec<u8>>,
}

impl ChannelTransport {
    pub fn new(partitions: usize, capacity: usize) -> (Self, Vec<PartitionReceiver>) {
        let (senders, receivers): (Vec<_>, Vec<_>) = (0..partitions.max(1))
            .map(|partition| {
                let (tx, rx) = mpsc::channel(capacity.max(1));
                (tx, PartitionReceiver { partition, rx })
            })
            .unzip();
        (
            Self {
                partitions: senders,
            },
            receivers,
        )
    }

    pub fn partition_for(&self, subject_id: i64) -> usize {
        subject_id.rem_euclid(self.partitions.len() as i64) as usize
    }
}

#[async_trait]
impl IntentTransport for ChannelTransport {
    async fn publish(&self, intent: &VoteIntent) -> Result<(), TransportError> {
        let payload =
            serde_json::to_vec(intent).map_err(|e| TransportError::Decode(e.to_string()))?;
        self.partitions[self.partition_for(intent.subject_id)]
            .send(payload)
            .await
            .map_err(|_| TransportError::Closed)
    }

    fn backlog(&self) -> usize {
        self.partitions
            .iter()
            .map(|tx| tx.max_capacity() - tx.capacity())
            .sum()
    }
}

impl PartitionReceiver {
    /// Next intent, or `None` once every publisher is gone.
    pub async fn next(&mut self) -> Option<Result<VoteIntent, TransportError>> {
        let payload = self.rx.recv().await?;
        Some(
            serde_json::from_slice(&payload).map_err(|e| TransportError::Decode(e.to_string())),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{SubjectKind, VoteValue};

    fn intent(subject_id: i64) -> VoteIntent {
        VoteIntent {
            subject_id,
            subject_kind: SubjectKind::Post,
            user_id: 1,
            vote: VoteValue::Up,
        }
    }

    #[tokio::test]
    async fn subjects_stick_to_one_partition() {
        let (transport, mut receivers) = ChannelTransport::new(3, 8);
        for subject in [4, 7, 5] {
            transport.publish(&intent(subject)).await.unwrap();
        }
        assert_eq!(transport.backlog(), 3);

        // 4 and 7 both land on partition 1.
        let p1 = &mut receivers[1];
        assert_eq!(p1.next().await.unwrap().unwrap().subject_id, 4);
        assert_eq!(p1.next().await.unwrap().unwrap().subject_id, 7);
        let p2 = &mut receivers[2];
        assert_eq!(p2.next().await.unwrap().unwrap().subject_id, 5);
        assert_eq!(transport.backlog(), 0);
    }

    #[tokio::test]
    async fn publish_fails_once_consumers_are_gone() {
        let (transport, receivers) = ChannelTransport::new(1, 1);
        drop(receivers);
        let err = transport.publish(&intent(1)).await.unwrap_err();
        assert!(matches!(err, TransportError::Closed));
    }

    #[tokio::test]
    async fn receiver_ends_when_transport_dropped() {
        let (transport, mut receivers) = ChannelTransport::new(1, 4);
        drop(transport);
        assert!(receivers[0].next().await.is_none());
    }
}
