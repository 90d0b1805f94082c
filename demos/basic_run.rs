//! Run a small batch through a fake generator and watch the events.
//!
//! ```sh
//! cargo run --example basic_run
//! ```

use std::time::Duration;
use stock_metadata_batch::*;
use tokio::sync::broadcast::error::RecvError;

struct FakeGenerator;

impl MetadataGenerator for FakeGenerator {
    async fn generate(
        &self,
        request: &GenerationRequest,
        credential: &Credential,
    ) -> Result<GeneratedFields> {
        // Simulate service latency
        tokio::time::sleep(Duration::from_millis(200)).await;
        println!("  [{}] {} bytes", credential.masked(), request.payload.base64_data.len());
        Ok(GeneratedFields::Metadata(MetadataFields {
            title: "MOUNTAIN LAKE AT SUNRISE".into(),
            description: "Calm alpine lake reflecting the first light".into(),
            keywords: vec!["Lake".into(), "mountain".into(), "sunrise".into()],
            category: "Landscapes".into(),
        }))
    }
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let mut settings = Settings::default();
    settings.add_key("demo-key-one-0001");
    settings.add_key("demo-key-two-0002");
    settings.controls.batch_size = 2;

    let config = GeneratorConfig::builder().with_requests_per_minute(10).build();
    let controller = GenerationController::new(FakeGenerator, config, settings);

    for name in ["lake.jpg", "peak.jpg", "forest.jpg", "river.jpg", "meadow.jpg"] {
        controller
            .staging()
            .add(WorkItem::ready(name, EncodedPayload::new("QUJDRA==", "image/jpeg")))?;
    }

    let mut events = controller.subscribe();
    let printer = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(GenerationEvent::Progress(p)) => println!("[{:>5.1}%] {}", p.percent, p.status),
                Ok(GenerationEvent::Notice { message, .. }) => println!("  > {}", message),
                Ok(_) => {}
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
    });

    match controller.start().await? {
        RunOutcome::Completed(summary) => {
            println!("Done: {}/{} in {}ms", summary.succeeded, summary.total, summary.duration_ms)
        }
        RunOutcome::Stopped { succeeded, total } => println!("Stopped at {}/{}", succeeded, total),
    }

    for record in controller.results() {
        println!("{}: {}", record.filename, record.fields.title().unwrap_or_default());
    }

    tokio::task::yield_now().await;
    printer.abort();
    Ok(())
}
