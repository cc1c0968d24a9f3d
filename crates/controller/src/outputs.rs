use crate::machine::SignalState;
use bus::{Approach, Aspect};
use serde::{Deserialize, Serialize};
use tracing::info;

/// GPIO and PWM assignments of the controller board.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PinMap {
    pub a_red: u8,
    pub a_green: u8,
    pub b_red: u8,
    pub b_green: u8,
    pub buzzer: u8,
    pub buzzer_channel: u8,
    pub buzzer_freq_hz: u32,
    pub buzzer_resolution_bits: u8,
}

impl Default for PinMap {
    fn default() -> Self {
        Self {
            a_red: 25,
            a_green: 26,
            b_red: 27,
            b_green: 14,
            buzzer: 33,
            buzzer_channel: 0,
            buzzer_freq_hz: 2000,
            buzzer_resolution_bits: 8,
        }
    }
}

impl PinMap {
    /// (red pin, green pin) for an approach.
    pub fn lamp_pins(&self, approach: Approach) -> (u8, u8) {
        match approach {
            Approach::A => (self.a_red, self.a_green),
            Approach::B => (self.b_red, self.b_green),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Tone {
    pub freq_hz: u32,
}

/// Physical state the outputs should show.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Lamps {
    pub aspects: [Aspect; 2],
    pub buzzer: Option<Tone>,
}

impl Lamps {
    pub const ALL_RED: Lamps = Lamps {
        aspects: [Aspect::Red, Aspect::Red],
        buzzer: None,
    };

    pub fn for_state(state: SignalState, pins: &PinMap) -> Self {
        match state {
            SignalState::Green(a) => {
                let mut aspects = [Aspect::Red; 2];
                aspects[a.index()] = Aspect::Green;
                Lamps {
                    aspects,
                    buzzer: None,
                }
            }
            SignalState::Switching { .. } => Lamps::ALL_RED,
            SignalState::Emergency => Lamps {
                aspects: [Aspect::Red; 2],
                buzzer: Some(Tone {
                    freq_hz: pins.buzzer_freq_hz,
                }),
            },
        }
    }

    pub fn aspect(&self, approach: Approach) -> Aspect {
        self.aspects[approach.index()]
    }
}

/// Hardware actuation seam. Implementations render lamps and the buzzer.
pub trait SignalOutputs {
    fn apply(&mut self, lamps: &Lamps);
}

/// One change on the board: a lamp line or the buzzer PWM channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PinWrite {
    Digital { pin: u8, high: bool },
    Tone { pin: u8, channel: u8, freq_hz: u32 },
    Silence { pin: u8, channel: u8 },
}

impl PinMap {
    /// Writes needed to go from `prev` to `next`. Everything is written when
    /// there is no previous state.
    pub fn writes(&self, prev: Option<&Lamps>, next: &Lamps) -> Vec<PinWrite> {
        let mut out = Vec::new();
        for a in Approach::ALL {
            let on = next.aspect(a).is_green();
            if prev.is_some_and(|p| p.aspect(a).is_green() == on) {
                continue;
            }
            let (red, green) = self.lamp_pins(a);
            out.push(PinWrite::Digital { pin: red, high: !on });
            out.push(PinWrite::Digital { pin: green, high: on });
        }
        if prev.map(|p| p.buzzer) != Some(next.buzzer) {
            out.push(match next.buzzer {
                Some(t) => PinWrite::Tone {
                    pin: self.buzzer,
                    channel: self.buzzer_channel,
                    freq_hz: t.freq_hz,
                },
                None => PinWrite::Silence {
                    pin: self.buzzer,
                    channel: self.buzzer_channel,
                },
            });
        }
        out
    }
}

/// Logs pin-level changes instead of driving GPIO.
#[derive(Debug)]
pub struct TracingOutputs {
    pins: PinMap,
    last: Option<Lamps>,
    writes: u64,
}

impl TracingOutputs {
    pub fn new(pins: PinMap) -> Self {
        Self {
            pins,
            last: None,
            writes: 0,
        }
    }

    pub fn pins(&self) -> &PinMap {
        &self.pins
    }

    /// Pin writes issued so far.
    pub fn writes(&self) -> u64 {
        self.writes
    }

    /// Apply `lamps` and return the pin writes it took.
    pub fn drive(&mut self, lamps: &Lamps) -> Vec<PinWrite> {
        let writes = self.pins.writes(self.last.as_ref(), lamps);
        for w in &writes {
            match *w {
                PinWrite::Digital { pin, high } => info!(pin, high, "lamp"),
                PinWrite::Tone {
                    pin,
                    channel,
                    freq_hz,
                } => info!(pin, channel, freq_hz, "buzzer on"),
                PinWrite::Silence { pin, channel } => info!(pin, channel, "buzzer off"),
            }
        }
        self.writes += writes.len() as u64;
        self.last = Some(*lamps);
        writes
    }
}

impl SignalOutputs for TracingOutputs {
    fn apply(&mut self, lamps: &Lamps) {
        self.drive(lamps);
    }
}

/// Keeps every distinct output state, for tests.
#[derive(Clone, Debug, Default)]
pub struct RecordingOutputs {
    pub history: Vec<Lamps>,
}

impl RecordingOutputs {
    pub fn current(&self) -> Option<Lamps> {
        self.history.last().copied()
    }
}

impl SignalOutputs for RecordingOutputs {
    fn apply(&mut self, lamps: &Lamps) {
        if self.current().as_ref() != Some(lamps) {
            self.history.push(*lamps);
        }
    }
}

impl<O: SignalOutputs + ?Sized> SignalOutputs for Box<O> {
    fn apply(&mut self, lamps: &Lamps) {
        (**self).apply(lamps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn green_state_lights_one_approach() {
        let l = Lamps::for_state(SignalState::Green(Approach::B), &PinMap::default());
        assert_eq!(l.aspect(Approach::A), Aspect::Red);
        assert_eq!(l.aspect(Approach::B), Aspect::Green);
        assert_eq!(l.buzzer, None);
    }

    #[test]
    fn emergency_is_all_red_with_tone() {
        let l = Lamps::for_state(SignalState::Emergency, &PinMap::default());
        assert_eq!(l.aspects, [Aspect::Red; 2]);
        assert_eq!(l.buzzer, Some(Tone { freq_hz: 2000 }));
    }

    #[test]
    fn switching_is_all_red_and_quiet() {
        let l = Lamps::for_state(
            SignalState::Switching { to: Approach::A },
            &PinMap::default(),
        );
        assert_eq!(l, Lamps::ALL_RED);
    }

    #[test]
    fn recorder_skips_repeats() {
        let mut rec = RecordingOutputs::default();
        rec.apply(&Lamps::ALL_RED);
        rec.apply(&Lamps::ALL_RED);
        assert_eq!(rec.history.len(), 1);
    }

    #[test]
    fn tracing_outputs_write_only_changed_pins() {
        let pins = PinMap {
            a_red: 4,
            a_green: 5,
            ..Default::default()
        };
        let mut out = TracingOutputs::new(pins);
        assert_eq!(out.pins().a_red, 4);

        let first = out.drive(&Lamps::ALL_RED);
        assert_eq!(first.len(), 5);
        assert!(first.contains(&PinWrite::Digital { pin: 4, high: true }));
        assert!(first.contains(&PinWrite::Digital { pin: 14, high: false }));
        assert!(out.drive(&Lamps::ALL_RED).is_empty());

        let a_green = Lamps::for_state(SignalState::Green(Approach::A), &pins);
        assert_eq!(
            out.drive(&a_green),
            vec![
                PinWrite::Digital { pin: 4, high: false },
                PinWrite::Digital { pin: 5, high: true },
            ]
        );

        let emergency = Lamps::for_state(SignalState::Emergency, &pins);
        let w = out.drive(&emergency);
        assert_eq!(
            w.last(),
            Some(&PinWrite::Tone {
                pin: 33,
                channel: 0,
                freq_hz: 2000
            })
        );
        let w = out.drive(&Lamps::ALL_RED);
        assert_eq!(w, vec![PinWrite::Silence { pin: 33, channel: 0 }]);
        assert_eq!(out.writes(), 5 + 2 + 3 + 1);
    }
}
