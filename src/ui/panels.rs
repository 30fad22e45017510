use eframe::egui::{self, Color32, RichText, ScrollArea, Ui};
use egui_extras::{Column, TableBuilder};

use mass_sculpt::config::CutPolicy;
use mass_sculpt::data::filter::range_label;

use crate::state::{AppState, View};

/// Standard deviations above the noise floor that count as sculpting.
const SIGNIFICANCE: f64 = 3.0;

// ---------------------------------------------------------------------------
// Left side panel – study settings
// ---------------------------------------------------------------------------

/// Render the left settings panel.
pub fn side_panel(ui: &mut Ui, state: &mut AppState) {
    ScrollArea::vertical()
        .auto_shrink([false, false])
        .show(ui, |ui: &mut Ui| {
            sculpting_section(ui, state);
            ui.add_space(8.0);
            loss_section(ui, state);
        });
}

fn sculpting_section(ui: &mut Ui, state: &mut AppState) {
    ui.heading("Mass sculpting");
    ui.separator();

    let Some(sample) = &state.sample else {
        ui.label("No sample loaded.");
        return;
    };
    let features: Vec<String> = state
        .candidate_features(sample)
        .into_iter()
        .map(str::to_string)
        .collect();

    // ---- pT range selector ----
    ui.strong("pT range");
    let labels: Vec<String> = state
        .config
        .pt_ranges
        .iter()
        .map(|r| range_label(r.as_ref()))
        .collect();
    let current = labels.get(state.range_index).cloned().unwrap_or_default();
    egui::ComboBox::from_id_salt("pt_range")
        .selected_text(&current)
        .show_ui(ui, |ui: &mut Ui| {
            for (i, label) in labels.iter().enumerate() {
                if ui
                    .selectable_label(state.range_index == i, label)
                    .clicked()
                {
                    state.range_index = i;
                }
            }
        });
    ui.separator();

    // ---- Feature selection (collapsible) ----
    let header_text = format!(
        "Features  ({}/{})",
        state.selected_features.len(),
        features.len()
    );
    egui::CollapsingHeader::new(RichText::new(header_text).strong())
        .id_salt("features")
        .default_open(true)
        .show(ui, |ui: &mut Ui| {
            for feature in &features {
                let mut checked = state.selected_features.contains(feature);
                let text = RichText::new(feature).color(state.color_map.color_for(feature));
                if ui.checkbox(&mut checked, text).changed() {
                    state.toggle_feature(feature);
                }
            }
        });

    // ---- Limit settings ----
    egui::CollapsingHeader::new(RichText::new("Noise floor").strong())
        .id_salt("limit")
        .default_open(false)
        .show(ui, |ui: &mut Ui| {
            ui.horizontal(|ui: &mut Ui| {
                ui.label("Cut");
                egui::ComboBox::from_id_salt("cut_policy")
                    .selected_text(match state.config.cut_policy {
                        CutPolicy::Resample => "re-derived per draw",
                        CutPolicy::Fixed => "fixed from nominal",
                    })
                    .show_ui(ui, |ui: &mut Ui| {
                        ui.selectable_value(
                            &mut state.config.cut_policy,
                            CutPolicy::Resample,
                            "re-derived per draw",
                        );
                        ui.selectable_value(
                            &mut state.config.cut_policy,
                            CutPolicy::Fixed,
                            "fixed from nominal",
                        );
                    });
            });
            ui.horizontal(|ui: &mut Ui| {
                ui.label("Bootstrap trials");
                ui.add(egui::DragValue::new(&mut state.config.limit_trials).range(1..=100));
            });
            ui.horizontal(|ui: &mut Ui| {
                ui.label("Smoothing passes");
                ui.add(egui::DragValue::new(&mut state.config.smoothing_passes).range(0..=10));
            });
        });

    let can_run = !state.selected_features.is_empty();
    if ui
        .add_enabled(can_run, egui::Button::new("Run JSD study"))
        .clicked()
    {
        state.run_study();
    }

    summary_table(ui, state);
}

/// Largest JSD and number of significant operating points per feature.
fn summary_table(ui: &mut Ui, state: &AppState) {
    let Some(range) = state
        .report
        .as_ref()
        .and_then(|r| r.ranges.get(state.range_index))
    else {
        return;
    };
    ui.add_space(6.0);
    ui.strong(format!("Summary – {}", range.label));

    TableBuilder::new(ui)
        .striped(true)
        .column(Column::auto())
        .column(Column::auto())
        .column(Column::remainder())
        .header(20.0, |mut header| {
            header.col(|ui| {
                ui.strong("Feature");
            });
            header.col(|ui| {
                ui.strong("max JSD");
            });
            header.col(|ui| {
                ui.strong(format!("> {SIGNIFICANCE}σ"));
            });
        })
        .body(|mut body| {
            for curve in &range.curves {
                let max = curve.points.iter().map(|p| p.jsd).fold(0.0, f64::max);
                let significant = range.significant_points(&curve.feature, SIGNIFICANCE).len();
                body.row(18.0, |mut row| {
                    row.col(|ui| {
                        ui.label(
                            RichText::new(&curve.feature)
                                .color(state.color_map.color_for(&curve.feature)),
                        );
                    });
                    row.col(|ui| {
                        ui.label(format!("{max:.2e}"));
                    });
                    row.col(|ui| {
                        ui.label(format!("{significant}/{}", curve.points.len()));
                    });
                });
            }
        });
}

fn loss_section(ui: &mut Ui, state: &mut AppState) {
    ui.heading("Training losses");
    ui.separator();

    match &state.history_dir {
        Some(dir) => ui.label(dir.display().to_string()),
        None => ui.label("No history folder chosen."),
    };
    ui.horizontal(|ui: &mut Ui| {
        ui.label("λ");
        ui.add(
            egui::DragValue::new(&mut state.lambda)
                .speed(0.1)
                .range(0.0..=1000.0),
        );
        ui.label("folds");
        ui.add(egui::DragValue::new(&mut state.num_folds).range(0..=20));
    });
    if ui
        .add_enabled(state.history_dir.is_some(), egui::Button::new("Aggregate losses"))
        .clicked()
    {
        state.run_losses();
    }
}

// ---------------------------------------------------------------------------
// Top bar
// ---------------------------------------------------------------------------

/// Render the top menu / toolbar.
pub fn top_bar(ui: &mut Ui, state: &mut AppState) {
    egui::menu::bar(ui, |ui: &mut Ui| {
        ui.menu_button("File", |ui: &mut Ui| {
            if ui.button("Open sample…").clicked() {
                open_sample_dialog(state);
                ui.close_menu();
            }
            if ui.button("Open histories folder…").clicked() {
                if let Some(dir) = rfd::FileDialog::new()
                    .set_title("Folder with history__*.json files")
                    .pick_folder()
                {
                    state.history_dir = Some(dir);
                }
                ui.close_menu();
            }
            if ui.button("Load config…").clicked() {
                if let Some(path) = rfd::FileDialog::new()
                    .set_title("Analysis configuration")
                    .add_filter("JSON", &["json"])
                    .pick_file()
                {
                    state.load_config(&path);
                }
                ui.close_menu();
            }
        });

        ui.separator();

        if let Some(sample) = &state.sample {
            ui.label(format!(
                "{} events, {} features selected",
                sample.len(),
                state.selected_features.len()
            ));
        }

        ui.separator();

        if ui
            .selectable_label(state.view == View::Sculpting, "JSD")
            .clicked()
        {
            state.view = View::Sculpting;
        }
        if ui
            .selectable_label(state.view == View::Losses, "Losses")
            .clicked()
        {
            state.view = View::Losses;
        }

        if let Some(msg) = &state.status_message {
            ui.label(RichText::new(msg).color(Color32::RED));
        }
    });
}

// ---------------------------------------------------------------------------
// File dialog
// ---------------------------------------------------------------------------

pub fn open_sample_dialog(state: &mut AppState) {
    let file = rfd::FileDialog::new()
        .set_title("Open jet sample")
        .add_filter("Supported files", &["parquet", "pq", "json", "csv"])
        .add_filter("Parquet", &["parquet", "pq"])
        .add_filter("JSON", &["json"])
        .add_filter("CSV", &["csv"])
        .pick_file();

    if let Some(path) = file {
        state.load_sample(&path);
    }
}
