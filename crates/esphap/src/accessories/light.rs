//! Light translator.
//!
//! Hue, saturation, and brightness edits land in a local HSV mirror and are
//! always committed to the device as one combined color write: the platform
//! fires hue and saturation as separate set events in immediate succession
//! for one color-wheel gesture, and writing the pair together avoids an
//! intermediate invalid color. Named effects become one switch per effect,
//! mutually exclusive on every set event.

use std::sync::Arc;
use std::sync::Mutex;

use esphap_hap::Accessory;
use esphap_hap::Characteristic;
use esphap_hap::CharacteristicKind;
use esphap_hap::ServiceKind;

use crate::esphome::client::Command;
use crate::esphome::client::LightCommand;
use crate::esphome::component::Component;
use crate::esphome::component::ComponentConfig;
use crate::esphome::component::ComponentState;
use crate::esphome::component::LightColorMode;

/// The device's "no effect" sentinel; never exposed as a switch.
const NO_EFFECT: &str = "None";

/// HSV to RGB. Hue 0-360, saturation and value 0-100; channels 0-255.
fn hsv_to_rgb(h: f64, s: f64, v: f64) -> (f64, f64, f64) {
    let s = s / 100.0;
    let v = v / 100.0;
    let c = v * s;
    let hp = (h % 360.0) / 60.0;
    let x = c * (1.0 - ((hp % 2.0) - 1.0).abs());
    let (r, g, b) = match hp as u32 {
        0 => (c, x, 0.0),
        1 => (x, c, 0.0),
        2 => (0.0, c, x),
        3 => (0.0, x, c),
        4 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };
    let m = v - c;
    ((r + m) * 255.0, (g + m) * 255.0, (b + m) * 255.0)
}

/// RGB to HSV. Channels 0-255; hue 0-360, saturation and value 0-100.
fn rgb_to_hsv(r: f64, g: f64, b: f64) -> (f64, f64, f64) {
    let r = r / 255.0;
    let g = g / 255.0;
    let b = b / 255.0;
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;

    let h = if delta == 0.0 {
        0.0
    } else if max == r {
        60.0 * (((g - b) / delta) % 6.0)
    } else if max == g {
        60.0 * ((b - r) / delta + 2.0)
    } else {
        60.0 * ((r - g) / delta + 4.0)
    };
    let h = if h < 0.0 { h + 360.0 } else { h };
    let s = if max == 0.0 { 0.0 } else { delta / max * 100.0 };
    (h, s, max * 100.0)
}

/// Combined color target owned by the translator.
struct LightTarget {
    on: bool,
    /// 0 = hue, 1 = saturation, 2 = brightness.
    hsv: [f64; 3],
}

fn build_command(
    key: u32,
    target: &LightTarget,
    supports_rgb: bool,
    supports_brightness: bool,
) -> LightCommand {
    if !supports_rgb && !supports_brightness {
        return LightCommand {
            key,
            on: target.on,
            brightness: None,
            red: None,
            green: None,
            blue: None,
            color_mode: None,
            effect: None,
        };
    }

    let brightness = target.hsv[2];
    let (r, g, b) = hsv_to_rgb(target.hsv[0], target.hsv[1], 100.0);

    let mut mode = LightColorMode::Rgb;
    let mut rgb = (r, g, b);
    if supports_rgb {
        // A zero hue/saturation pair is plain white light.
        if target.hsv[0] == 0.0 && target.hsv[1] == 0.0 {
            mode = LightColorMode::White;
            rgb = (0.0, 0.0, b);
        }
    } else {
        mode = LightColorMode::White;
        rgb = (0.0, 0.0, b);
    }

    LightCommand {
        key,
        on: target.on,
        brightness: Some(brightness / 100.0),
        red: Some(rgb.0 / 255.0),
        green: Some(rgb.1 / 255.0),
        blue: Some(rgb.2 / 255.0),
        color_mode: Some(mode),
        effect: None,
    }
}

fn effect_command(key: u32, on: bool, effect: String) -> LightCommand {
    LightCommand {
        key,
        on,
        brightness: None,
        red: None,
        green: None,
        blue: None,
        color_mode: None,
        effect: Some(effect),
    }
}

pub(crate) fn translate(component: &Component, accessory: &Arc<Accessory>) -> bool {
    let ComponentConfig::Light(config) = component.info.config.clone() else {
        return false;
    };

    let key = component.info.key;
    let name = component.info.name.clone();
    let service = accessory.service(ServiceKind::Lightbulb, &name);
    let target = Arc::new(Mutex::new(LightTarget {
        on: false,
        hsv: [0.0, 0.0, 100.0],
    }));

    let commit: Arc<dyn Fn() + Send + Sync> = {
        let target = target.clone();
        let component = component.clone();
        let supports_rgb = config.supports_rgb;
        let supports_brightness = config.supports_brightness;
        Arc::new(move || {
            let command = {
                let target = target.lock().unwrap();
                build_command(key, &target, supports_rgb, supports_brightness)
            };
            component.send_command(Command::Light(command));
        })
    };

    let on = service.characteristic(CharacteristicKind::On);
    {
        let target = target.clone();
        let commit = commit.clone();
        on.on_set(move |value| {
            if let Some(state) = value.as_bool() {
                target.lock().unwrap().on = state;
                commit();
            }
        });
    }

    let wire_hsv = |kind: CharacteristicKind, index: usize| {
        let characteristic = service.characteristic(kind);
        let target = target.clone();
        let commit = commit.clone();
        characteristic.on_set(move |value| {
            if let Some(v) = value.as_f64() {
                target.lock().unwrap().hsv[index] = v;
                commit();
            }
        });
    };

    if config.supports_rgb {
        wire_hsv(CharacteristicKind::Hue, 0);
        wire_hsv(CharacteristicKind::Saturation, 1);
        wire_hsv(CharacteristicKind::Brightness, 2);
    } else if config.supports_brightness {
        wire_hsv(CharacteristicKind::Brightness, 2);
    }

    // One auxiliary switch per named effect; activating one turns its
    // siblings off.
    let effect_switches: Vec<(String, Arc<Characteristic>)> = config
        .effects
        .iter()
        .filter(|effect| effect.as_str() != NO_EFFECT)
        .map(|effect| {
            let switch = accessory.service(ServiceKind::Switch, &format!("{} {}", name, effect));
            (effect.clone(), switch.characteristic(CharacteristicKind::On))
        })
        .collect();

    for (effect, characteristic) in &effect_switches {
        let siblings: Vec<Arc<Characteristic>> = effect_switches
            .iter()
            .filter(|(sibling, _)| sibling != effect)
            .map(|(_, characteristic)| characteristic.clone())
            .collect();
        let effect = effect.clone();
        let component = component.clone();
        characteristic.on_set(move |value| {
            let Some(on) = value.as_bool() else {
                return;
            };
            if on {
                for sibling in &siblings {
                    sibling.update_value(false);
                }
                component.send_command(Command::Light(effect_command(key, true, effect.clone())));
            } else {
                component.send_command(Command::Light(effect_command(
                    key,
                    true,
                    NO_EFFECT.to_string(),
                )));
            }
        });
    }

    let mut stream = component.state_stream();
    let report_service = service.clone();
    let report_target = target;
    let report_switches = effect_switches;
    tokio::spawn(async move {
        loop {
            let update = match &*stream.borrow_and_update() {
                Some(ComponentState::Light(update)) => Some(update.clone()),
                _ => None,
            };
            if let Some(update) = update {
                report_service
                    .characteristic(CharacteristicKind::On)
                    .update_value(update.on);
                let brightness = update.brightness.unwrap_or(0.0);

                if config.supports_rgb && update.color_mode == Some(LightColorMode::Rgb) {
                    if let (Some(r), Some(g), Some(b)) = (update.red, update.green, update.blue) {
                        let (h, s, v) = rgb_to_hsv(r * 255.0, g * 255.0, b * 255.0);
                        report_service
                            .characteristic(CharacteristicKind::Hue)
                            .update_value(h);
                        report_service
                            .characteristic(CharacteristicKind::Saturation)
                            .update_value(s);
                        report_service
                            .characteristic(CharacteristicKind::Brightness)
                            .update_value(v * brightness);
                        let mut target = report_target.lock().unwrap();
                        target.on = update.on;
                        target.hsv = [h, s, v * brightness];
                    }
                } else if config.supports_brightness {
                    report_service
                        .characteristic(CharacteristicKind::Brightness)
                        .update_value(brightness * 100.0);
                    let mut target = report_target.lock().unwrap();
                    target.on = update.on;
                    target.hsv = [0.0, 0.0, brightness * 100.0];
                }

                if let Some(active_effect) = &update.effect {
                    for (effect, characteristic) in &report_switches {
                        characteristic.update_value(effect == active_effect);
                    }
                }
            }
            if stream.changed().await.is_err() {
                break;
            }
        }
    });

    true
}
