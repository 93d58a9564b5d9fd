pub mod prompt;

pub use prompt::{DurationUnit, StudyRequest, ValidationError};

use crate::buffer::BufferWriter;
use crate::event::{AppEvent, GenerationId, GenerationStatus};
use crate::ollama::{InferenceError, OllamaClient};
use crate::supervisor::ServerSupervisor;
use eframe::egui;
use futures::StreamExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub const GENERATING_STATUS: &str = "⏳ Generating your AI-powered study plan...\n";
pub const PLAN_HEADER: &str = "✅ Here’s your study plan:\n\n";
pub const EMPTY_RESPONSE_NOTICE: &str = "⚠️ The model returned an empty response.\n";

struct InFlight {
    generation: GenerationId,
    task: JoinHandle<()>,
}

/// Turns form input into a streamed plan.
///
/// Each submit gets a fresh generation id and aborts whatever generation was
/// still running, so at most one task writes to the display at a time.
pub struct PlanGenerator {
    client: OllamaClient,
    supervisor: Arc<ServerSupervisor>,
    runtime: Handle,
    tx: mpsc::Sender<AppEvent>,
    live: Arc<AtomicBool>,
    repaint: Option<egui::Context>,
    next_generation: u64,
    in_flight: Option<InFlight>,
}

impl PlanGenerator {
    pub fn new(
        client: OllamaClient,
        supervisor: Arc<ServerSupervisor>,
        runtime: Handle,
        tx: mpsc::Sender<AppEvent>,
    ) -> Self {
        Self {
            client,
            supervisor,
            runtime,
            tx,
            live: Arc::new(AtomicBool::new(true)),
            repaint: None,
            next_generation: 0,
            in_flight: None,
        }
    }

    pub fn attach_repaint(&mut self, ctx: egui::Context) {
        self.repaint = Some(ctx);
    }

    pub fn is_running(&self) -> bool {
        self.in_flight
            .as_ref()
            .is_some_and(|in_flight| !in_flight.task.is_finished())
    }

    pub fn submit(
        &mut self,
        topic: &str,
        duration_value: &str,
        duration_unit: DurationUnit,
    ) -> Result<GenerationId, ValidationError> {
        let request = StudyRequest::from_form(topic, duration_value, duration_unit)?;
        self.cancel_in_flight();

        self.next_generation += 1;
        let generation = GenerationId(self.next_generation);
        let writer = BufferWriter::new(
            generation,
            self.tx.clone(),
            Arc::clone(&self.live),
            self.repaint.clone(),
        );
        writer.start();
        writer.append(GENERATING_STATUS);

        info!(
            %generation,
            topic = %request.topic,
            duration = ?request.duration_value,
            unit = %request.duration_unit,
            model = %self.client.model(),
            "starting plan generation"
        );
        let task = self.runtime.spawn(run_generation(
            self.client.clone(),
            Arc::clone(&self.supervisor),
            request.prompt(),
            writer,
        ));
        self.in_flight = Some(InFlight { generation, task });

        Ok(generation)
    }

    /// Aborts the running generation, if any. Its later writes are refused.
    pub fn cancel_in_flight(&mut self) {
        if let Some(in_flight) = self.in_flight.take() {
            if !in_flight.task.is_finished() {
                info!(generation = %in_flight.generation, "cancelling in-flight generation");
                in_flight.task.abort();
            }
        }
    }

    /// Stops all further display writes and aborts the running generation.
    pub fn shutdown(&mut self) {
        self.live.store(false, Ordering::SeqCst);
        self.cancel_in_flight();
    }
}

enum StreamOutcome {
    Completed { fragments: usize },
    Abandoned,
}

async fn run_generation(
    client: OllamaClient,
    supervisor: Arc<ServerSupervisor>,
    prompt: String,
    writer: BufferWriter,
) {
    let generation = writer.generation();

    match supervisor.ensure_started() {
        Ok(outcome) => debug!(%generation, ?outcome, "inference server check"),
        Err(err) => {
            warn!(%generation, error = %err, "could not start inference server");
            let notice = format!("\n❌ Failed to start {}: {err}\n", supervisor.binary());
            if !writer.append(notice) {
                return;
            }
        }
    }

    match stream_plan(&client, &prompt, &writer).await {
        Ok(StreamOutcome::Completed { fragments }) => {
            if fragments == 0 {
                warn!(%generation, "model returned no fragments");
                writer.clear();
                writer.append(EMPTY_RESPONSE_NOTICE);
            }
            info!(%generation, fragments, "plan generation finished");
            writer.finish(GenerationStatus::Done);
        }
        Ok(StreamOutcome::Abandoned) => {
            debug!(%generation, "display closed, abandoning generation");
        }
        Err(err) => {
            warn!(%generation, error = %err, "plan generation failed");
            writer.clear();
            writer.append(format!(
                "❌ Error communicating with the model server: {err}\n"
            ));
            writer.finish(GenerationStatus::Failed);
        }
    }
}

async fn stream_plan(
    client: &OllamaClient,
    prompt: &str,
    writer: &BufferWriter,
) -> Result<StreamOutcome, InferenceError> {
    let fragments = client.generate_stream(prompt).await?;
    let mut fragments = std::pin::pin!(fragments.into_stream());

    let mut received = 0usize;
    while let Some(fragment) = fragments.next().await {
        let fragment = fragment?;
        if received == 0 && !(writer.clear() && writer.append(PLAN_HEADER)) {
            return Ok(StreamOutcome::Abandoned);
        }
        received += 1;
        if !writer.append(fragment) {
            return Ok(StreamOutcome::Abandoned);
        }
    }

    Ok(StreamOutcome::Completed {
        fragments: received,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::PlanBuffer;
    use crate::config::Config;
    use crate::event::BufferOp;
    use crate::test_support::{closed_port, local_config, mock_generate};
    use httpmock::prelude::*;
    use std::time::Duration;
    use tokio::net::TcpListener;

    fn generator(port: u16, binary: &str, autostart: bool) -> (PlanGenerator, mpsc::Receiver<AppEvent>) {
        let config = Config {
            server_binary: binary.to_string(),
            autostart,
            ..local_config(port)
        };
        let client = OllamaClient::new(&config).expect("client should build");
        let supervisor = Arc::new(ServerSupervisor::new(&config));
        let (tx, rx) = mpsc::channel();
        (
            PlanGenerator::new(client, supervisor, Handle::current(), tx),
            rx,
        )
    }

    /// Collects events until the given generation finishes.
    async fn events_until_finished(
        rx: mpsc::Receiver<AppEvent>,
        generation: GenerationId,
    ) -> Vec<AppEvent> {
        tokio::task::spawn_blocking(move || {
            let mut events = Vec::new();
            while let Ok(event) = rx.recv_timeout(Duration::from_secs(10)) {
                let done = matches!(
                    event,
                    AppEvent::Finished { generation: finished, .. } if finished == generation
                );
                events.push(event);
                if done {
                    break;
                }
            }
            events
        })
        .await
        .expect("event collector should not panic")
    }

    fn render(events: &[AppEvent]) -> PlanBuffer {
        let mut buffer = PlanBuffer::default();
        for event in events {
            buffer.apply(event.clone());
        }
        buffer
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn fragments_are_appended_in_order_after_the_header() {
        let server = MockServer::start_async().await;
        let generate = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/api/generate")
                    .body_contains("within 2 days");
                then.status(200).body(concat!(
                    "{\"response\":\"Day 1: \"}\n",
                    "{\"response\":\"intro\"}\n",
                    "{\"response\":\"\\nDay 2: review\"}\n",
                ));
            })
            .await;
        let (mut generator, rx) = generator(server.port(), "ollama", false);

        let generation = generator
            .submit("Linear Algebra", "2", DurationUnit::Days)
            .expect("topic is valid");
        let events = events_until_finished(rx, generation).await;

        let appended: Vec<&str> = events
            .iter()
            .filter_map(|event| match event {
                AppEvent::Buffer {
                    op: BufferOp::Append(text),
                    ..
                } => Some(text.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(
            appended,
            vec![GENERATING_STATUS, PLAN_HEADER, "Day 1: ", "intro", "\nDay 2: review"]
        );

        let buffer = render(&events);
        assert_eq!(
            buffer.read(),
            format!("{PLAN_HEADER}Day 1: intro\nDay 2: review")
        );
        assert_eq!(buffer.status(), GenerationStatus::Done);

        generate.assert_async().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn malformed_line_replaces_output_with_parse_error() {
        let server = MockServer::start_async().await;
        mock_generate(
            &server,
            &[
                r#"{"response":"Day 1"}"#,
                "not json at all",
                r#"{"response":"after the error"}"#,
            ],
        )
        .await;
        let (mut generator, rx) = generator(server.port(), "ollama", false);

        let generation = generator
            .submit("Chemistry", "", DurationUnit::Months)
            .expect("topic is valid");
        let buffer = render(&events_until_finished(rx, generation).await);

        assert!(buffer.read().starts_with("❌ Error communicating with the model server"));
        assert!(buffer.read().contains("not json at all"));
        assert!(!buffer.read().contains("after the error"));
        assert_eq!(buffer.status(), GenerationStatus::Failed);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn unreachable_server_reports_transport_failure() {
        let port = closed_port().await;
        let (mut generator, rx) = generator(port, "ollama", false);

        let generation = generator
            .submit("History", "1", DurationUnit::Years)
            .expect("topic is valid");
        let buffer = render(&events_until_finished(rx, generation).await);

        assert!(buffer.read().contains("transport error"));
        assert_eq!(buffer.status(), GenerationStatus::Failed);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn server_start_failure_is_reported_and_generation_continues() {
        let server = MockServer::start_async().await;
        mock_generate(&server, &[r#"{"response":"Week 1"}"#]).await;
        let (mut generator, rx) = generator(server.port(), "study-planner-no-such-binary", true);

        let generation = generator
            .submit("Biology", "", DurationUnit::Months)
            .expect("topic is valid");
        let events = events_until_finished(rx, generation).await;

        assert!(events.iter().any(|event| matches!(
            event,
            AppEvent::Buffer { op: BufferOp::Append(text), .. }
                if text.contains("Failed to start study-planner-no-such-binary")
        )));
        assert_eq!(render(&events).read(), format!("{PLAN_HEADER}Week 1"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn empty_stream_leaves_a_notice() {
        let server = MockServer::start_async().await;
        mock_generate(&server, &[]).await;
        let (mut generator, rx) = generator(server.port(), "ollama", false);

        let generation = generator
            .submit("Statistics", "", DurationUnit::Months)
            .expect("topic is valid");
        let buffer = render(&events_until_finished(rx, generation).await);

        assert_eq!(buffer.read(), EMPTY_RESPONSE_NOTICE);
        assert_eq!(buffer.status(), GenerationStatus::Done);
    }

    #[tokio::test]
    async fn blank_topic_starts_nothing() {
        let (mut generator, rx) = generator(closed_port().await, "ollama", false);

        let result = generator.submit("   ", "3", DurationUnit::Months);
        assert_eq!(result, Err(ValidationError::EmptyTopic));
        assert!(rx.try_recv().is_err());
        assert!(!generator.is_running());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn resubmit_supersedes_the_running_generation() {
        // Accepts connections into the backlog but never answers.
        let silent = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("listener should bind");
        let port = silent.local_addr().expect("listener address").port();
        let (mut generator, rx) = generator(port, "ollama", false);

        let first = generator
            .submit("Topic A", "", DurationUnit::Months)
            .expect("topic is valid");
        let second = generator
            .submit("Topic B", "", DurationUnit::Months)
            .expect("topic is valid");
        assert_ne!(first, second);
        assert!(generator.is_running());

        generator.shutdown();
        let buffer = render(&rx.try_iter().collect::<Vec<_>>());
        assert_eq!(buffer.active_generation(), Some(second));
        assert_eq!(buffer.read(), GENERATING_STATUS);
    }
}
