#![no_main]

use futures::executor::block_on;
use futures::FutureExt;
use libfuzzer_sys::arbitrary::{Arbitrary, Unstructured};
use libfuzzer_sys::fuzz_target;
use pgwire_gateway::auth::{AuthFlow, AuthOptions, ScramSha256Data};
use pgwire_gateway::ConnectionState;
use rand::rngs::StdRng;
use rand::SeedableRng;

#[derive(Debug)]
struct ScramInput {
    client_first: Vec<u8>,
    client_final: Vec<u8>,
}

impl<'a> Arbitrary<'a> for ScramInput {
    fn arbitrary(u: &mut Unstructured<'a>) -> libfuzzer_sys::arbitrary::Result<Self> {
        Ok(Self {
            client_first: u.arbitrary()?,
            client_final: u.arbitrary()?,
        })
    }
}

fn password_message(body: &[u8]) -> Vec<u8> {
    let mut msg = vec![b'p'];
    msg.extend_from_slice(&((body.len() + 4) as i32).to_be_bytes());
    msg.extend_from_slice(body);
    msg
}

fuzz_target!(|input: ScramInput| {
    let mut rng = StdRng::seed_from_u64(0);
    let data = match ScramSha256Data::from_password("pw", 1, &mut rng) {
        Ok(data) => data,
        Err(_) => return,
    };
    let options = AuthOptions::scram_sha256(move |_, _| {
        let data = data.clone();
        async move { Ok(data) }.boxed()
    });
    let mut flow = AuthFlow::new(&options, "fuzz", &mut rng);
    let state = ConnectionState::default();

    // Arbitrary SASLInitialResponse followed by an arbitrary SASLResponse
    let mut first = b"SCRAM-SHA-256\0".to_vec();
    first.extend_from_slice(&(input.client_first.len() as i32).to_be_bytes());
    first.extend_from_slice(&input.client_first);

    block_on(async {
        if flow
            .handle_client_message(&password_message(&first), &state)
            .await
            .is_err()
        {
            return;
        }
        let _ = flow
            .handle_client_message(&password_message(&input.client_final), &state)
            .await;
    });

    // A random proof never authenticates
    assert!(!flow.is_completed());
});
