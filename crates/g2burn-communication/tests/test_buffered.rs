use g2burn_communication::{
    CommandBuffer, MockTransport, PendingCommand, StreamJob, StreamLine, StreamingConfig,
    StreamingController,
};
use proptest::prelude::*;
use std::time::Duration;
use uuid::Uuid;

fn job_with_lengths(lengths: &[usize]) -> StreamJob {
    StreamJob {
        id: Uuid::new_v4(),
        lines: lengths
            .iter()
            .enumerate()
            .map(|(i, len)| StreamLine {
                text: "X".repeat(*len),
                instruction_index: Some(i),
                skip: false,
            })
            .collect(),
        total_instructions: lengths.len(),
    }
}

#[test]
fn test_fifo_correlation() {
    let mut buffer = CommandBuffer::new(128);
    for (i, text) in ["G21", "G90", "M5"].iter().enumerate() {
        buffer.push(PendingCommand::new(*text, Some(i))).unwrap();
    }
    assert_eq!(buffer.outstanding_bytes(), 4 + 4 + 3);

    let order: Vec<String> = std::iter::from_fn(|| buffer.acknowledge())
        .map(|c| c.text)
        .collect();
    assert_eq!(order, vec!["G21", "G90", "M5"]);
    assert_eq!(buffer.outstanding_bytes(), 0);
}

proptest! {
    #[test]
    fn prop_outstanding_never_exceeds_budget(
        lengths in prop::collection::vec(1usize..40, 1..40),
        acks in prop::collection::vec(0usize..4, 1..80),
        max in 41usize..160,
    ) {
        let (mock, handle) = MockTransport::new("mock0");
        let mut controller = StreamingController::new(StreamingConfig {
            max_buffer_bytes: max,
            poll_interval: Duration::from_secs(3600),
            stall_timeout: Duration::from_secs(3600),
            read_timeout: Duration::from_millis(1),
        });
        controller.attach(mock).unwrap();
        handle.clear_writes();

        let job = job_with_lengths(&lengths);
        let expected: Vec<String> = job.lines.iter().map(|l| l.text.clone()).collect();
        controller.start_job(job).unwrap();
        prop_assert!(controller.outstanding_bytes() <= max);

        for burst in acks {
            for _ in 0..burst.min(controller.pending_len()) {
                handle.push_line("ok");
            }
            controller.poll();
            prop_assert!(controller.outstanding_bytes() <= max);
        }

        while controller.is_streaming() {
            for _ in 0..controller.pending_len() {
                handle.push_line("ok");
            }
            controller.poll();
            prop_assert!(controller.outstanding_bytes() <= max);
        }

        prop_assert_eq!(handle.sent_lines(), expected);
        prop_assert_eq!(controller.progress(), (lengths.len(), lengths.len()));
    }
}
