#![no_main]

use drainflow::config::InputFormat;
use drainflow::drain::DrainFactory;
use drainflow::model::TemplateModel;
use drainflow::transform::{process_line, TransformerFactory};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(input) = std::str::from_utf8(data) {
        // Line errors are fine; we only care about panics.
        let mut transformer = DrainFactory::default().create(TemplateModel::new().snapshot(0));
        for line in input.lines() {
            let _ = process_line(&mut transformer, line, &InputFormat::Text, "message");
            let _ = process_line(&mut transformer, line, &InputFormat::Json, "message");
        }
    }
});
