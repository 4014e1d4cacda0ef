#![no_main]

use libfuzzer_sys::arbitrary::{Arbitrary, Unstructured};
use libfuzzer_sys::fuzz_target;
use pgwire_gateway::protocol::MessageBuffer;

#[derive(Debug)]
struct StreamingInput {
    data: Vec<u8>,
    split_points: Vec<u8>,
    has_started: bool,
}

impl<'a> Arbitrary<'a> for StreamingInput {
    fn arbitrary(u: &mut Unstructured<'a>) -> libfuzzer_sys::arbitrary::Result<Self> {
        Ok(Self {
            data: u.arbitrary()?,
            split_points: u.arbitrary()?,
            has_started: u.arbitrary()?,
        })
    }
}

fuzz_target!(|input: StreamingInput| {
    let mut splits: Vec<usize> = input
        .split_points
        .iter()
        .map(|&b| (b as usize) % (input.data.len() + 1))
        .collect();
    splits.push(0);
    splits.push(input.data.len());
    splits.sort_unstable();
    splits.dedup();

    // Keep the limit small so huge length fields are rejected, not buffered
    let mut buffer = MessageBuffer::with_max_message_length(64 * 1024);
    let mut consumed = 0;
    for window in splits.windows(2) {
        buffer.merge_buffer(&input.data[window[0]..window[1]]);
        match buffer.process_messages(input.has_started) {
            Ok(messages) => consumed += messages.iter().map(|m| m.len()).sum::<usize>(),
            Err(_) => return,
        }
    }

    // Nothing lost, nothing duplicated
    assert_eq!(consumed + buffer.buffered_len(), input.data.len());
});
