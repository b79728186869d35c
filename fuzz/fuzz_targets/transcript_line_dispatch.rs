#![no_main]

use libfuzzer_sys::fuzz_target;
use xchat_relay::{clamp_rounds, RelayCommand, RelayCommandMatcher};
use xchat_transcript::{extract_user_utterance, strip_untrusted_metadata};

fuzz_target!(|data: &[u8]| {
    let raw = String::from_utf8_lossy(data);
    let Ok(matcher) = RelayCommandMatcher::new() else {
        return;
    };

    let stripped = strip_untrusted_metadata(&raw);
    assert!(stripped.len() <= raw.len());

    if let Ok(Some(text)) = extract_user_utterance(&raw) {
        assert!(!text.is_empty());
        assert_eq!(text.trim(), text);
        if let Some(RelayCommand::SetRounds(rounds)) = matcher.match_command(&text) {
            assert_eq!(clamp_rounds(i64::from(rounds)), rounds);
        }
        let padded = format!(" {text}\n");
        assert_eq!(matcher.match_command(&padded), matcher.match_command(&text));
    }
});
