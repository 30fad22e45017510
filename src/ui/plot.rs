use eframe::egui::{Color32, Stroke, Ui};
use egui_plot::{HLine, Legend, Line, LineStyle, Plot, PlotPoints, Points, Polygon, VLine};

use mass_sculpt::loss::{
    ADVERSARY_LOSS, AggregatedCurve, CLASSIFIER_LOSS, COMBINED_LOSS, VAL_ADVERSARY_LOSS,
    VAL_CLASSIFIER_LOSS, VAL_COMBINED_LOSS,
};

use crate::color::band_fill;
use crate::state::AppState;

/// JSD values are shown on a log axis; zero is drawn at this value.
const JSD_FLOOR: f64 = 1e-9;

const TRAIN_COLOR: Color32 = Color32::from_rgb(66, 133, 244);
const VAL_COLOR: Color32 = Color32::from_rgb(219, 68, 55);

fn log_jsd(value: f64) -> f64 {
    value.max(JSD_FLOOR).log10()
}

/// Closed outline of `lower(x)..upper(x)` for a shaded band.
fn band_polygon(x: &[f64], lower: &[f64], upper: &[f64]) -> PlotPoints<'static> {
    x.iter()
        .zip(upper)
        .map(|(&x, &y)| [x, y])
        .chain(x.iter().zip(lower).rev().map(|(&x, &y)| [x, y]))
        .collect()
}

fn placeholder(ui: &mut Ui, text: &str) {
    ui.centered_and_justified(|ui: &mut Ui| {
        ui.heading(text);
    });
}

// ---------------------------------------------------------------------------
// JSD vs. background efficiency (central panel)
// ---------------------------------------------------------------------------

/// Pass/fail JSD of every scanned feature with the bootstrap noise floor.
pub fn jsd_plot(ui: &mut Ui, state: &AppState) {
    let Some(report) = &state.report else {
        placeholder(ui, "Open a sample and run the JSD study  (File → Open sample…)");
        return;
    };
    let Some(range) = report.ranges.get(state.range_index) else {
        placeholder(ui, "No results for this pT range");
        return;
    };

    Plot::new("jsd_plot")
        .legend(Legend::default())
        .x_axis_label("Background efficiency")
        .y_axis_label("log₁₀ JSD(pass ‖ fail)")
        .allow_boxed_zoom(true)
        .allow_drag(true)
        .allow_scroll(true)
        .allow_zoom(true)
        .show(ui, |plot_ui| {
            if let Some(limit) = &range.limit {
                let x: Vec<f64> = limit.points.iter().map(|p| p.x).collect();
                let lower: Vec<f64> = limit
                    .points
                    .iter()
                    .map(|p| log_jsd(p.mean - p.std))
                    .collect();
                let upper: Vec<f64> = limit
                    .points
                    .iter()
                    .map(|p| log_jsd(p.mean + p.std))
                    .collect();
                plot_ui.polygon(
                    Polygon::new(band_polygon(&x, &lower, &upper))
                        .name("Statistical limit ±1σ")
                        .fill_color(band_fill(Color32::GRAY))
                        .stroke(Stroke::NONE),
                );
                let mean: PlotPoints = limit
                    .points
                    .iter()
                    .map(|p| [p.x, log_jsd(p.mean)])
                    .collect();
                plot_ui.line(
                    Line::new(mean)
                        .name("Statistical limit ±1σ")
                        .color(Color32::GRAY)
                        .style(LineStyle::dashed_loose())
                        .width(1.0),
                );
            }

            for curve in &range.curves {
                let color = state.color_map.color_for(&curve.feature);
                let name = format!("{} ({})", curve.feature, range.label);
                let series: Vec<[f64; 2]> = curve
                    .points
                    .iter()
                    .map(|p| [p.operating_point, log_jsd(p.jsd)])
                    .collect();
                plot_ui.line(
                    Line::new(PlotPoints::from(series.clone()))
                        .name(&name)
                        .color(color)
                        .width(1.5),
                );
                plot_ui.points(
                    Points::new(PlotPoints::from(series))
                        .name(&name)
                        .color(color)
                        .radius(3.0),
                );
            }
        });
}

// ---------------------------------------------------------------------------
// Training losses (central panel, three stacked plots)
// ---------------------------------------------------------------------------

/// Classifier, adversary and combined losses with fold bands.
pub fn loss_plots(ui: &mut Ui, state: &AppState) {
    let Some(report) = &state.loss else {
        placeholder(ui, "Choose a history folder and aggregate the losses");
        return;
    };
    let refs = &report.references;
    let height = (ui.available_height() / 3.0 - 8.0).max(120.0);

    let panels = [
        (
            "classifier",
            "L_clf",
            [CLASSIFIER_LOSS, VAL_CLASSIFIER_LOSS],
            Some(("Classifier optimum", refs.classifier_optimum)),
        ),
        (
            "adversary",
            "L_adv",
            [ADVERSARY_LOSS, VAL_ADVERSARY_LOSS],
            refs.prior_entropy.map(|h| ("H(prior)", h)),
        ),
        (
            "combined",
            "L_clf − λ L_adv",
            [COMBINED_LOSS, VAL_COMBINED_LOSS],
            refs.ideal_combined.map(|v| ("Ideal", v)),
        ),
    ];

    for (id, y_label, channels, reference) in panels {
        Plot::new(format!("loss_{id}"))
            .height(height)
            .legend(Legend::default())
            .x_axis_label("Training epoch")
            .y_axis_label(y_label)
            .show(ui, |plot_ui| {
                for (channel, color, label) in [
                    (channels[0], TRAIN_COLOR, "Training"),
                    (channels[1], VAL_COLOR, "Validation"),
                ] {
                    draw_band(plot_ui, &report.curve, channel, color, label);
                }
                if let Some((name, y)) = reference {
                    plot_ui.hline(HLine::new(y).name(name).color(Color32::DARK_GRAY));
                }
                if let Some(epochs) = refs.pretrain_epochs {
                    plot_ui.vline(
                        VLine::new(epochs as f64 + 0.5)
                            .name("Adversary pre-training")
                            .color(Color32::LIGHT_GRAY),
                    );
                }
            });
    }
}

fn draw_band(
    plot_ui: &mut egui_plot::PlotUi,
    curve: &AggregatedCurve,
    channel: &str,
    color: Color32,
    label: &str,
) {
    let Some(band) = curve.channel(channel) else {
        return;
    };
    let series = band.series();
    let x: Vec<f64> = series.iter().map(|s| s.0).collect();
    let lower: Vec<f64> = series.iter().map(|s| s.1 - s.2).collect();
    let upper: Vec<f64> = series.iter().map(|s| s.1 + s.2).collect();

    plot_ui.polygon(
        Polygon::new(band_polygon(&x, &lower, &upper))
            .name(label)
            .fill_color(band_fill(color))
            .stroke(Stroke::NONE),
    );
    let mean: PlotPoints = series.iter().map(|s| [s.0, s.1]).collect();
    plot_ui.line(Line::new(mean).name(label).color(color).width(1.5));
}
