use crate::buffer::PlanBuffer;
use crate::event::{AppEvent, GenerationStatus};
use crate::export::{self, ExportError, ExportOutcome};
use crate::planner::{DurationUnit, PlanGenerator};
use crate::supervisor::ServerSupervisor;
use crate::theme::Theme;
use eframe::egui::{self, FontId, RichText, ScrollArea};
use std::sync::mpsc::{Receiver, TryRecvError};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

const NOTHING_TO_SAVE: &str = "\n⚠️ Nothing to save!\n";

pub struct StudyPlannerApp {
    rx: Receiver<AppEvent>,
    generator: PlanGenerator,
    supervisor: Arc<ServerSupervisor>,
    buffer: PlanBuffer,
    theme: Theme,
    model: String,
    topic_input: String,
    duration_input: String,
    duration_unit: DurationUnit,
    scroll_to_bottom: bool,
    shut_down: bool,
}

impl StudyPlannerApp {
    pub fn new(
        rx: Receiver<AppEvent>,
        generator: PlanGenerator,
        supervisor: Arc<ServerSupervisor>,
        model: String,
    ) -> Self {
        Self {
            rx,
            generator,
            supervisor,
            buffer: PlanBuffer::default(),
            theme: Theme::default(),
            model,
            topic_input: String::new(),
            duration_input: String::new(),
            duration_unit: DurationUnit::default(),
            scroll_to_bottom: false,
            shut_down: false,
        }
    }

    /// Hooks the app into the egui context once the window exists.
    pub fn install(&mut self, ctx: &egui::Context) {
        self.theme.apply_visuals(ctx);
        self.generator.attach_repaint(ctx.clone());
    }

    fn drain_events(&mut self) {
        loop {
            match self.rx.try_recv() {
                Ok(event) => {
                    if self.buffer.apply(event) {
                        self.scroll_to_bottom = true;
                    }
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    debug!("event channel disconnected");
                    break;
                }
            }
        }
    }

    fn submit_plan(&mut self) {
        match self.generator.submit(
            &self.topic_input,
            &self.duration_input,
            self.duration_unit,
        ) {
            Ok(generation) => {
                debug!(%generation, "plan submitted");
                self.scroll_to_bottom = true;
            }
            Err(err) => {
                warn!(error = %err, "plan request rejected");
                self.drain_events();
                self.generator.cancel_in_flight();
                self.buffer.reset();
                self.buffer.append(&format!("⚠️ {err}\n"));
            }
        }
    }

    fn save_pdf(&mut self) {
        if self.generator.is_running() {
            debug!("save ignored while a plan is streaming");
            return;
        }
        let text = self.buffer.read().to_string();
        // The picker only opens when there is something to write.
        if text.trim().is_empty() {
            self.buffer.append(NOTHING_TO_SAVE);
            return;
        }

        let destination = rfd::FileDialog::new()
            .set_title("Save Study Plan As PDF")
            .set_file_name("study_plan.pdf")
            .add_filter("PDF files", &["pdf"])
            .save_file();

        match export::export(&text, destination.as_deref()) {
            Ok(ExportOutcome::Saved(path)) => {
                self.buffer
                    .append(&format!("\n✅ Saved to PDF: {}\n", path.display()));
            }
            Ok(ExportOutcome::Cancelled) => {}
            Err(ExportError::Empty) => self.buffer.append(NOTHING_TO_SAVE),
            Err(err) => {
                error!(error = %err, "pdf export failed");
                self.buffer
                    .append(&format!("\n❌ Failed to save PDF: {err}\n"));
            }
        }
        self.scroll_to_bottom = true;
    }

    /// Runs once, on the first close request.
    fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;
        info!("window closing, shutting down");

        self.generator.shutdown();
        if let Err(err) = self.supervisor.stop() {
            error!(error = %err, "error shutting down inference server");
            self.buffer.append(&format!(
                "\n❌ Error shutting down {}: {err}\n",
                self.supervisor.binary()
            ));
        }
    }

    fn render_top_bar(&mut self, ctx: &egui::Context) {
        let status = self.buffer.status();
        let status_color = self.theme.status_color(status);
        egui::TopBottomPanel::top("top_bar").show(ctx, |ui| {
            ui.add_space(self.theme.spacing_4);
            ui.horizontal(|ui| {
                ui.heading("AI Study Planner");
                ui.separator();
                ui.label(RichText::new(format!("model: {}", self.model)).color(self.theme.text_muted));
                ui.separator();
                ui.label(
                    RichText::new(format!("server: {}", self.supervisor.lifecycle().as_str()))
                        .color(self.theme.text_muted),
                );
                ui.separator();
                let plan_label = match self.buffer.active_generation() {
                    Some(generation) => format!("● plan {generation} {}", status.as_str()),
                    None => format!("● {}", status.as_str()),
                };
                ui.label(RichText::new(plan_label).color(status_color));
            });
            ui.add_space(self.theme.spacing_4);
        });
    }

    fn render_form(&mut self, ui: &mut egui::Ui) -> (bool, bool) {
        let mut generate = false;
        let mut save = false;

        self.theme.card_frame().show(ui, |ui| {
            ui.label(RichText::new("📚 Enter the topic you want to study:").size(18.0));
            let topic = ui.add(
                egui::TextEdit::singleline(&mut self.topic_input)
                    .hint_text("e.g. Organic Chemistry, Python Basics")
                    .desired_width(f32::INFINITY),
            );
            if topic.lost_focus() && ui.input(|i| i.key_pressed(egui::Key::Enter)) {
                generate = true;
            }

            ui.add_space(self.theme.spacing_8);
            ui.label("⏱ Desired Study Duration:");
            ui.horizontal(|ui| {
                ui.add(
                    egui::TextEdit::singleline(&mut self.duration_input)
                        .hint_text("e.g. 3")
                        .desired_width(100.0),
                );
                egui::ComboBox::from_id_salt("duration_unit")
                    .selected_text(self.duration_unit.as_str())
                    .width(120.0)
                    .show_ui(ui, |ui| {
                        for unit in DurationUnit::ALL {
                            ui.selectable_value(&mut self.duration_unit, unit, unit.as_str());
                        }
                    });
            });

            ui.add_space(self.theme.spacing_8);
            ui.horizontal(|ui| {
                let running = self.generator.is_running();
                let label = if running {
                    "🧠 Regenerate Study Plan"
                } else {
                    "🧠 Generate Study Plan"
                };
                generate |= ui.add(self.theme.primary_button(label)).clicked();
                save |= ui
                    .add_enabled(!running, self.theme.secondary_button("📄 Save as PDF"))
                    .clicked();
            });
        });

        (generate, save)
    }

    fn render_output(&mut self, ui: &mut egui::Ui) {
        let theme = &self.theme;
        let mut view = self.buffer.read();
        theme.card_frame().show(ui, |ui| {
            ScrollArea::vertical()
                .id_salt("plan_output")
                .auto_shrink([false, false])
                .stick_to_bottom(true)
                .show(ui, |ui| {
                    ui.add(
                        egui::TextEdit::multiline(&mut view)
                            .font(FontId::proportional(theme.plan_font_size))
                            .desired_width(f32::INFINITY)
                            .desired_rows(20)
                            .frame(false),
                    );
                    if self.scroll_to_bottom {
                        ui.scroll_to_cursor(Some(egui::Align::BOTTOM));
                    }
                });
        });
        self.scroll_to_bottom = false;
    }

    fn render_center_panel(&mut self, ctx: &egui::Context) {
        let mut generate = false;
        let mut save = false;

        egui::CentralPanel::default().show(ctx, |ui| {
            ui.add_space(self.theme.spacing_8);
            (generate, save) = self.render_form(ui);
            ui.add_space(self.theme.spacing_12);
            self.render_output(ui);
        });

        if generate {
            self.submit_plan();
        }
        if save {
            self.save_pdf();
        }
    }

    fn status_hint(&self) -> Option<&'static str> {
        match self.buffer.status() {
            GenerationStatus::Running => Some("Streaming from the model server..."),
            _ => None,
        }
    }
}

impl eframe::App for StudyPlannerApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.drain_events();
        if ctx.input(|i| i.viewport().close_requested()) {
            self.shutdown();
        }

        self.render_top_bar(ctx);
        if let Some(hint) = self.status_hint() {
            egui::TopBottomPanel::bottom("status_bar").show(ctx, |ui| {
                ui.label(RichText::new(hint).color(self.theme.text_muted).small());
            });
        }
        self.render_center_panel(ctx);
    }
}
