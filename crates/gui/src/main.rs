use bus::{Approach, Aspect, ModeLabel, PhaseLabel, StateMessage};
use controller::{ControllerSetup, TracingOutputs};
use eframe::egui;
use egui_plot::{Line, Plot, PlotPoints};
use serde::Deserialize;
use serde_json::Value;
use sim::{Intersection, Scenario};
use std::fs;

#[derive(Clone, Debug)]
struct Sample {
    t: f64,
    phase: PhaseLabel,
    mode: ModeLabel,
    lamps: [Aspect; 2],
    queue: [u32; 2],
    remaining_ms: Option<u64>,
    emergency_remaining_ms: Option<u64>,
    buzzer: bool,
    fail_safe: bool,
}

impl From<StateMessage> for Sample {
    fn from(m: StateMessage) -> Self {
        Self {
            t: m.ts_ms as f64 / 1000.0,
            phase: m.phase,
            mode: m.mode,
            lamps: [m.lamps.a, m.lamps.b],
            queue: [m.queue.a, m.queue.b],
            remaining_ms: m.remaining_ms,
            emergency_remaining_ms: m.emergency_remaining_ms,
            buzzer: m.buzzer,
            fail_safe: m.fail_safe,
        }
    }
}

/// One line of the command-line trace.
#[derive(Debug, Deserialize)]
struct CliLine {
    #[allow(dead_code)]
    t_ms: u64,
    topic: String,
    payload: Value,
}

fn phase_text(p: PhaseLabel) -> &'static str {
    match p {
        PhaseLabel::AGreen => "A_GREEN",
        PhaseLabel::BGreen => "B_GREEN",
        PhaseLabel::Switching => "SWITCHING",
        PhaseLabel::Emergency => "EMERGENCY",
    }
}

struct App {
    scenario: Scenario,
    seconds: f64,
    tick_ms: u64,
    seed: u64,
    min_green_ms: u64,
    max_green_ms: u64,

    running: bool,
    now_ms: u64,
    live: Option<Intersection<TracingOutputs>>,

    samples: Vec<Sample>,
    events: Vec<String>,

    replay_loaded: bool,
    replay_path: String,
    replay_all: Vec<Sample>,
    replay_pos: usize,
    replay_playing: bool,
    replay_speed: usize,
    last_error: Option<String>,
}

impl Default for App {
    fn default() -> Self {
        let mut app = Self {
            scenario: Scenario::Normal,
            seconds: 180.0,
            tick_ms: 100,
            seed: 12345,
            min_green_ms: 5_000,
            max_green_ms: 20_000,

            running: false,
            now_ms: 0,
            live: None,

            samples: Vec::new(),
            events: Vec::new(),

            replay_loaded: false,
            replay_path: "out/demo_emergency.jsonl".to_string(),
            replay_all: Vec::new(),
            replay_pos: 0,
            replay_playing: false,
            replay_speed: 5,
            last_error: None,
        };
        app.reset_live();
        app
    }
}

impl App {
    fn clear_replay(&mut self) {
        self.replay_loaded = false;
        self.replay_all.clear();
        self.replay_pos = 0;
        self.replay_playing = false;
        self.last_error = None;
    }

    fn reset_live(&mut self) {
        self.running = false;
        self.now_ms = 0;
        self.samples.clear();
        self.events.clear();

        let mut setup = ControllerSetup::default();
        setup.timing.min_green_ms = self.min_green_ms;
        setup.timing.max_green_ms = self.max_green_ms;
        let outputs = TracingOutputs::new(setup.pins);
        match self
            .scenario
            .build_with(setup, &self.scenario.detectors(), self.seed, outputs)
        {
            Ok(x) => {
                self.live = Some(x);
                self.last_error = None;
            }
            Err(e) => {
                self.live = None;
                self.last_error = Some(format!("Invalid timing: {e}"));
            }
        }
    }

    fn reset(&mut self) {
        self.clear_replay();
        self.reset_live();
    }

    fn step_once_live(&mut self) {
        let end_ms = (self.seconds * 1000.0) as u64;
        let Some(x) = self.live.as_mut() else {
            self.running = false;
            return;
        };
        if self.now_ms > end_ms {
            self.running = false;
            return;
        }

        let state_topic = x.topics().state().to_string();
        let emergency_topic = x.topics().emergency().to_string();
        for msg in x.step(self.now_ms) {
            if msg.topic == state_topic {
                if let Ok(m) = bus::decode::<StateMessage>(&msg.payload) {
                    self.samples.push(m.into());
                }
            } else if msg.topic == emergency_topic {
                self.events
                    .push(format!("{:.1}s emergency message", self.now_ms as f64 / 1000.0));
            } else if let Ok(bus::Route::Arrival(a)) = x.topics().route(&msg.topic) {
                self.events
                    .push(format!("{:.1}s arrival on {a}", self.now_ms as f64 / 1000.0));
            }
        }
        if self.events.len() > 200 {
            let extra = self.events.len() - 200;
            self.events.drain(..extra);
        }
        let tick = self.now_ms + self.tick_ms.max(1);
        self.now_ms = match x.next_wakeup_ms() {
            Some(due) if due > self.now_ms && due < tick => due,
            _ => tick,
        };
    }

    fn load_jsonl(&mut self, path: &str) {
        self.last_error = None;

        let text = match fs::read_to_string(path) {
            Ok(t) => t,
            Err(e) => {
                self.last_error = Some(format!("Failed to read {path}: {e}"));
                return;
            }
        };

        let mut loaded: Vec<Sample> = Vec::new();
        for (i, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() {
                continue;
            }
            let row: CliLine = match serde_json::from_str(line) {
                Ok(v) => v,
                Err(e) => {
                    self.last_error = Some(format!("JSON parse error at line {}: {}", i + 1, e));
                    return;
                }
            };
            if !row.topic.ends_with("/state") {
                continue;
            }
            match serde_json::from_value::<StateMessage>(row.payload) {
                Ok(m) => loaded.push(m.into()),
                Err(e) => {
                    self.last_error = Some(format!("Bad state payload at line {}: {}", i + 1, e));
                    return;
                }
            }
        }

        if loaded.is_empty() {
            self.last_error = Some(format!("No state messages found in {path}"));
            return;
        }

        self.running = false;
        self.clear_replay();
        self.replay_loaded = true;
        self.replay_all = loaded;

        self.samples.clear();
        self.events.clear();
        let initial = self.replay_speed.min(self.replay_all.len()).max(1);
        self.samples.extend_from_slice(&self.replay_all[..initial]);
        self.replay_pos = initial;
    }

    fn replay_advance(&mut self, n: usize) {
        if self.replay_pos >= self.replay_all.len() {
            self.replay_playing = false;
            return;
        }
        let end = (self.replay_pos + n.max(1)).min(self.replay_all.len());
        self.samples
            .extend_from_slice(&self.replay_all[self.replay_pos..end]);
        self.replay_pos = end;
        if self.replay_pos >= self.replay_all.len() {
            self.replay_playing = false;
        }
    }
}

fn lamp(ui: &mut egui::Ui, approach: Approach, aspect: Aspect) {
    let (rect, _) = ui.allocate_exact_size(egui::vec2(64.0, 28.0), egui::Sense::hover());
    let painter = ui.painter();
    let on_red = aspect == Aspect::Red;
    let dim = egui::Color32::from_gray(50);
    let red = if on_red { egui::Color32::RED } else { dim };
    let green = if on_red { dim } else { egui::Color32::GREEN };
    painter.circle_filled(rect.left_center() + egui::vec2(14.0, 0.0), 11.0, red);
    painter.circle_filled(rect.left_center() + egui::vec2(42.0, 0.0), 11.0, green);
    ui.label(format!("Approach {approach}"));
}

impl eframe::App for App {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        if self.replay_loaded && self.replay_playing {
            self.replay_advance(self.replay_speed);
            ctx.request_repaint();
        }

        let source_txt = if self.replay_loaded { "REPLAY" } else { "LIVE" };
        let last = self.samples.last().cloned();

        egui::TopBottomPanel::top("top").show(ctx, |ui| {
            ui.horizontal(|ui| {
                ui.heading("Intersection Controller");
                ui.separator();
                ui.label(format!("SOURCE: {source_txt}"));
                if let Some(s) = &last {
                    ui.separator();
                    ui.label(format!("PHASE: {}", phase_text(s.phase)));
                    ui.separator();
                    let (txt, color) = match s.mode {
                        ModeLabel::Normal => ("MODE: NORMAL", egui::Color32::GREEN),
                        ModeLabel::Emergency => ("MODE: EMERGENCY", egui::Color32::YELLOW),
                    };
                    ui.colored_label(color, txt);
                    if s.fail_safe {
                        ui.separator();
                        ui.colored_label(egui::Color32::RED, "FAIL-SAFE: ALL RED");
                    }
                }
            });
        });

        egui::SidePanel::left("left")
            .resizable(false)
            .show(ctx, |ui| {
                ui.label("Scenario");
                if self.replay_loaded {
                    ui.add_enabled(false, egui::Label::new(self.scenario.label()));
                } else {
                    let mut scenario_new = self.scenario;
                    egui::ComboBox::from_id_salt("scenario")
                        .selected_text(self.scenario.label())
                        .show_ui(ui, |ui| {
                            for s in Scenario::ALL {
                                ui.selectable_value(&mut scenario_new, s, s.label());
                            }
                        });
                    if scenario_new != self.scenario {
                        self.scenario = scenario_new;
                        self.reset_live();
                    }
                }

                ui.separator();
                ui.label("Simulation settings");
                let live_enabled = !self.replay_loaded;
                ui.add_enabled(
                    live_enabled,
                    egui::Slider::new(&mut self.seconds, 30.0..=600.0).text("seconds"),
                );
                ui.add_enabled(
                    live_enabled,
                    egui::Slider::new(&mut self.tick_ms, 10..=500).text("tick (ms)"),
                );
                ui.add_enabled(
                    live_enabled,
                    egui::Slider::new(&mut self.min_green_ms, 1_000..=15_000).text("min green (ms)"),
                );
                ui.add_enabled(
                    live_enabled,
                    egui::Slider::new(&mut self.max_green_ms, 5_000..=60_000).text("max green (ms)"),
                );
                ui.add_enabled(
                    live_enabled,
                    egui::DragValue::new(&mut self.seed).prefix("seed: "),
                );

                ui.separator();
                ui.horizontal(|ui| {
                    if ui.button("Reset").clicked() {
                        self.reset();
                    }
                    let run_label = if self.running { "Pause" } else { "Run" };
                    if ui
                        .add_enabled(live_enabled, egui::Button::new(run_label))
                        .clicked()
                    {
                        if !self.running && self.now_ms == 0 {
                            self.reset_live();
                        }
                        self.running = !self.running;
                    }
                    if ui
                        .add_enabled(live_enabled, egui::Button::new("Step"))
                        .clicked()
                    {
                        self.step_once_live();
                    }
                });

                if let Some(x) = &mut self.live {
                    if !self.replay_loaded && x.control().fail_safe() {
                        if ui.button("Reset fail-safe").clicked() {
                            x.control_mut().reset_fail_safe();
                        }
                    }
                }

                ui.separator();
                ui.label("Replay (JSONL)");
                ui.horizontal(|ui| {
                    ui.label("path:");
                    ui.text_edit_singleline(&mut self.replay_path);
                });
                ui.horizontal(|ui| {
                    if ui.button("Load").clicked() {
                        let p = self.replay_path.clone();
                        self.load_jsonl(&p);
                    }
                    if ui
                        .button(if self.replay_playing {
                            "Pause replay"
                        } else {
                            "Play replay"
                        })
                        .clicked()
                        && self.replay_loaded
                    {
                        self.replay_playing = !self.replay_playing;
                        ctx.request_repaint();
                    }
                    if ui.button("Step replay").clicked() && self.replay_loaded {
                        self.replay_advance(1);
                    }
                });
                ui.add(
                    egui::Slider::new(&mut self.replay_speed, 1..=100)
                        .text("replay speed (states/frame)"),
                );
                if self.replay_loaded {
                    ui.small(format!(
                        "Loaded: {}/{} states",
                        self.samples.len(),
                        self.replay_all.len()
                    ));
                } else {
                    ui.small("No replay loaded.");
                }

                if let Some(err) = &self.last_error {
                    ui.separator();
                    ui.colored_label(egui::Color32::RED, err);
                }

                if !self.events.is_empty() {
                    ui.separator();
                    ui.label("Recent bus events");
                    egui::ScrollArea::vertical()
                        .max_height(160.0)
                        .stick_to_bottom(true)
                        .show(ui, |ui| {
                            for e in &self.events {
                                ui.small(e);
                            }
                        });
                }
            });

        egui::CentralPanel::default().show(ctx, |ui| {
            if self.running && !self.replay_loaded {
                for _ in 0..5 {
                    if !self.running {
                        break;
                    }
                    self.step_once_live();
                }
                ctx.request_repaint();
            }

            let Some(last) = self.samples.last().cloned() else {
                ui.label("No data yet. Run LIVE or Load a REPLAY file.");
                return;
            };

            ui.horizontal(|ui| {
                for a in Approach::ALL {
                    lamp(ui, a, last.lamps[a.index()]);
                    ui.separator();
                }
                if last.buzzer {
                    ui.colored_label(egui::Color32::YELLOW, "BUZZER");
                }
            });

            let queue_a: PlotPoints = self.samples.iter().map(|s| [s.t, s.queue[0] as f64]).collect();
            let queue_b: PlotPoints = self.samples.iter().map(|s| [s.t, s.queue[1] as f64]).collect();
            let green_a: PlotPoints = self
                .samples
                .iter()
                .map(|s| [s.t, if s.lamps[0].is_green() { 1.0 } else { 0.0 }])
                .collect();
            let green_b: PlotPoints = self
                .samples
                .iter()
                .map(|s| [s.t, if s.lamps[1].is_green() { -1.0 } else { 0.0 }])
                .collect();

            ui.heading("Queues");
            Plot::new("queue_plot").height(240.0).show(ui, |plot_ui| {
                plot_ui.line(Line::new(queue_a).name("Queue A"));
                plot_ui.line(Line::new(queue_b).name("Queue B"));
            });

            Plot::new("green_plot").height(120.0).show(ui, |plot_ui| {
                plot_ui.line(Line::new(green_a).name("A green"));
                plot_ui.line(Line::new(green_b).name("B green"));
            });

            ui.separator();
            let remaining = match (last.emergency_remaining_ms, last.remaining_ms) {
                (Some(ms), _) => format!("emergency ends in {:.1}s", ms as f64 / 1000.0),
                (None, Some(ms)) => format!("green ends in {:.1}s", ms as f64 / 1000.0),
                (None, None) => "-".to_string(),
            };
            ui.label(format!(
                "t={:.1}s  phase={}  queue A={} B={}  {}",
                last.t,
                phase_text(last.phase),
                last.queue[0],
                last.queue[1],
                remaining
            ));
        });
    }
}

fn main() -> eframe::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
    let native_options = eframe::NativeOptions::default();
    eframe::run_native(
        "Intersection Controller",
        native_options,
        Box::new(|_cc| Ok(Box::new(App::default()))),
    )
}
