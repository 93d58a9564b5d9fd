use crate::event::GenerationStatus;
use eframe::egui::{self, Color32, CornerRadius, FontId, Frame, Margin, Stroke, TextStyle};

#[derive(Debug, Clone)]
pub struct Theme {
    pub surface_0: Color32,
    pub surface_2: Color32,
    pub accent_primary: Color32,
    pub accent_muted: Color32,
    pub success: Color32,
    pub warning: Color32,
    pub danger: Color32,
    pub text_primary: Color32,
    pub text_muted: Color32,
    pub text_on_accent: Color32,
    pub border_subtle: Color32,
    pub spacing_4: f32,
    pub spacing_8: f32,
    pub spacing_12: f32,
    pub spacing_16: f32,
    pub radius_8: u8,
    pub radius_12: u8,
    pub button_height: f32,
    pub plan_font_size: f32,
}

impl Default for Theme {
    fn default() -> Self {
        Self {
            surface_0: Color32::from_rgb(0xF3, 0xF4, 0xF6),
            surface_2: Color32::from_rgb(0xFF, 0xFF, 0xFF),
            accent_primary: Color32::from_rgb(0x1F, 0x6A, 0xA5),
            accent_muted: Color32::from_rgb(0x14, 0x4E, 0x7A),
            success: Color32::from_rgb(0x16, 0xA3, 0x4A),
            warning: Color32::from_rgb(0xD9, 0x77, 0x06),
            danger: Color32::from_rgb(0xDC, 0x26, 0x26),
            text_primary: Color32::from_rgb(0x1F, 0x29, 0x37),
            text_muted: Color32::from_rgb(0x6B, 0x72, 0x80),
            text_on_accent: Color32::from_rgb(0xF8, 0xFB, 0xFF),
            border_subtle: Color32::from_rgb(0xD1, 0xD5, 0xDB),
            spacing_4: 4.0,
            spacing_8: Self::P8,
            spacing_12: 12.0,
            spacing_16: Self::P16,
            radius_8: Self::R8,
            radius_12: Self::R12,
            button_height: 40.0,
            plan_font_size: 18.0,
        }
    }
}

impl Theme {
    pub const R8: u8 = 8;
    pub const R12: u8 = 12;
    pub const P8: f32 = 8.0;
    pub const P16: f32 = 16.0;

    pub fn apply_visuals(&self, ctx: &egui::Context) {
        let mut visuals = egui::Visuals::light();
        visuals.panel_fill = self.surface_0;
        visuals.override_text_color = Some(self.text_primary);
        visuals.widgets.noninteractive.bg_fill = self.surface_2;
        visuals.widgets.noninteractive.bg_stroke = Stroke::new(1.0, self.border_subtle);
        visuals.widgets.inactive.bg_fill = self.surface_2;
        visuals.widgets.inactive.weak_bg_fill = self.surface_2;
        visuals.widgets.inactive.bg_stroke = Stroke::new(1.0, self.border_subtle);
        visuals.widgets.hovered.bg_stroke = Stroke::new(1.0, self.accent_primary);
        visuals.widgets.active.bg_fill = self.accent_muted;
        visuals.selection.bg_fill = self.accent_primary.gamma_multiply(0.35);
        visuals.selection.stroke = Stroke::new(1.0, self.accent_primary);
        visuals.extreme_bg_color = self.surface_2;
        visuals.window_corner_radius = CornerRadius::same(self.radius_12);

        let mut style = (*ctx.style()).clone();
        style.visuals = visuals;
        style.spacing.item_spacing = egui::vec2(10.0, 10.0);
        style.spacing.button_padding = egui::vec2(14.0, 8.0);
        style.text_styles.insert(TextStyle::Heading, FontId::proportional(22.0));
        style.text_styles.insert(TextStyle::Body, FontId::proportional(16.0));
        style.text_styles.insert(TextStyle::Button, FontId::proportional(16.0));
        style.text_styles.insert(TextStyle::Monospace, FontId::monospace(14.0));
        style.text_styles.insert(TextStyle::Small, FontId::proportional(12.0));
        ctx.set_style(style);
    }

    pub fn card_frame(&self) -> Frame {
        Frame::new()
            .fill(self.surface_2)
            .inner_margin(Margin::same(self.spacing_16 as i8))
            .corner_radius(CornerRadius::same(self.radius_12))
            .stroke(Stroke::new(1.0, self.border_subtle))
            .shadow(egui::epaint::Shadow {
                offset: [0, 2],
                blur: 12,
                spread: 0,
                color: Color32::from_black_alpha(20),
            })
    }

    pub fn primary_button(&self, label: &str) -> egui::Button<'static> {
        egui::Button::new(
            egui::RichText::new(label.to_string()).color(self.text_on_accent),
        )
        .fill(self.accent_primary)
        .stroke(Stroke::NONE)
        .corner_radius(CornerRadius::same(self.radius_8))
        .min_size(egui::vec2(0.0, self.button_height))
    }

    pub fn secondary_button(&self, label: &str) -> egui::Button<'static> {
        egui::Button::new(egui::RichText::new(label.to_string()).color(self.text_primary))
            .fill(self.surface_2)
            .stroke(Stroke::new(1.0, self.border_subtle))
            .corner_radius(CornerRadius::same(self.radius_8))
            .min_size(egui::vec2(0.0, self.button_height))
    }

    pub fn status_color(&self, status: GenerationStatus) -> Color32 {
        match status {
            GenerationStatus::Idle => self.text_muted,
            GenerationStatus::Running => self.warning,
            GenerationStatus::Done => self.success,
            GenerationStatus::Failed => self.danger,
        }
    }
}
