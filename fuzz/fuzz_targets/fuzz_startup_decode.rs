#![no_main]

use libfuzzer_sys::fuzz_target;
use pgwire_gateway::protocol::{decode_initial_message, InitialMessage};
use pgwire_gateway::ClientInfo;

fuzz_target!(|data: &[u8]| {
    if let Ok(InitialMessage::Startup(startup)) = decode_initial_message(data) {
        let user = startup.get("user").map(str::to_string);
        let info = ClientInfo::new(
            startup.major_version,
            startup.minor_version,
            startup.parameters,
        );
        assert_eq!(info.as_ref().map(|i| i.user().to_string()), user);
    }
});
