//! Color parsing and CSS custom properties derived from the dashboard config

use crate::config::DashboardConfig;
use regex::Regex;
use std::sync::LazyLock;
use wasm_bindgen::{JsCast, JsValue};

static RGB_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"rgba?\(\s*(\d+)\s*,\s*(\d+)\s*,\s*(\d+)\s*(?:,\s*[\d.]+)?\s*\)").unwrap()
});
static HSL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"hsla?\(\s*(\d+)\s*,\s*(\d+)%\s*,\s*(\d+)%\s*(?:,\s*[\d.]+)?\s*\)").unwrap()
});
static CSS_UNIT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\d+(px|%|em|rem|vh|vw|vmin|vmax|pt|pc|in|cm|mm|ex|ch|fr)$").unwrap()
});
static CSS_KEYWORD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(auto|inherit|initial|unset|none|normal|bold|italic|center|left|right|top|bottom|middle|baseline)$")
        .unwrap()
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

const NAMED_COLORS: [(&str, Rgb); 13] = [
    ("red", Rgb::new(255, 0, 0)),
    ("green", Rgb::new(0, 128, 0)),
    ("blue", Rgb::new(0, 0, 255)),
    ("white", Rgb::new(255, 255, 255)),
    ("black", Rgb::new(0, 0, 0)),
    ("yellow", Rgb::new(255, 255, 0)),
    ("cyan", Rgb::new(0, 255, 255)),
    ("magenta", Rgb::new(255, 0, 255)),
    ("orange", Rgb::new(255, 165, 0)),
    ("purple", Rgb::new(128, 0, 128)),
    ("pink", Rgb::new(255, 192, 203)),
    ("gray", Rgb::new(128, 128, 128)),
    ("grey", Rgb::new(128, 128, 128)),
];

fn parse_hex(hex: &str) -> Option<Rgb> {
    if !hex.is_ascii() {
        return None;
    }
    let channel = |s: &str| u8::from_str_radix(s, 16).ok();
    match hex.len() {
        3 => {
            let doubled: Vec<String> = hex.chars().map(|c| format!("{c}{c}")).collect();
            Some(Rgb::new(channel(&doubled[0])?, channel(&doubled[1])?, channel(&doubled[2])?))
        }
        6 => Some(Rgb::new(channel(&hex[0..2])?, channel(&hex[2..4])?, channel(&hex[4..6])?)),
        _ => None,
    }
}

fn channel_value(digits: &str) -> u8 {
    digits.parse::<u32>().map_or(255, |v| v.min(255) as u8)
}

fn hsl_to_rgb(h: u32, s: f64, l: f64) -> Rgb {
    let c = (1.0 - (2.0 * l - 1.0).abs()) * s;
    let x = c * (1.0 - ((h as f64 / 60.0) % 2.0 - 1.0).abs());
    let m = l - c / 2.0;
    let (r, g, b) = match h {
        0..=59 => (c, x, 0.0),
        60..=119 => (x, c, 0.0),
        120..=179 => (0.0, c, x),
        180..=239 => (0.0, x, c),
        240..=299 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };
    let to_byte = |v: f64| ((v + m) * 255.0).round().clamp(0.0, 255.0) as u8;
    Rgb::new(to_byte(r), to_byte(g), to_byte(b))
}

/// Parse hex, `rgb()`/`rgba()`, `hsl()`/`hsla()` or a basic color name
///
/// Anything unrecognized is black.
pub fn parse_color_to_rgb(color: &str) -> Rgb {
    if let Some(hex) = color.strip_prefix('#') {
        if let Some(rgb) = parse_hex(&hex.replace('#', "")) {
            return rgb;
        }
    }
    if let Some(caps) = RGB_RE.captures(color) {
        return Rgb::new(channel_value(&caps[1]), channel_value(&caps[2]), channel_value(&caps[3]));
    }
    if let Some(caps) = HSL_RE.captures(color) {
        let number = |i: usize| caps[i].parse::<u32>().unwrap_or(0);
        return hsl_to_rgb(number(1), number(2) as f64 / 100.0, number(3) as f64 / 100.0);
    }
    let lower = color.to_lowercase();
    NAMED_COLORS
        .iter()
        .find(|(name, _)| *name == lower)
        .map(|(_, rgb)| *rgb)
        .unwrap_or_default()
}

/// Hue in whole degrees, saturation and lightness in `0..=1`
fn rgb_to_hsl(rgb: Rgb) -> (f64, f64, f64) {
    let r = rgb.r as f64 / 255.0;
    let g = rgb.g as f64 / 255.0;
    let b = rgb.b as f64 / 255.0;
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let diff = max - min;

    let mut h = 0.0;
    if diff != 0.0 {
        h = if max == r {
            ((g - b) / diff) % 6.0
        } else if max == g {
            (b - r) / diff + 2.0
        } else {
            (r - g) / diff + 4.0
        };
    }
    // `+ 0.0` folds a rounded -0 into 0
    let mut h = (h * 60.0).round() + 0.0;
    if h < 0.0 {
        h += 360.0;
    }
    let l = (max + min) / 2.0;
    let s = if diff == 0.0 { 0.0 } else { diff / (1.0 - (2.0 * l - 1.0).abs()) };
    (h, s, l)
}

/// Diagonal gradient from a darker to a lighter shade of the icon color
pub fn circle_gradient_background(icon_color: Option<&str>, fallback: &str) -> String {
    let base = icon_color.filter(|c| !c.is_empty()).unwrap_or(fallback);
    let (h, s, l) = rgb_to_hsl(parse_color_to_rgb(base));
    let light = format!(
        "hsl({}, {}%, {}%)",
        h,
        (s * 100.0 + 10.0).min(80.0),
        (l * 100.0 + 15.0).min(75.0)
    );
    let dark = format!(
        "hsl({}, {}%, {}%)",
        h,
        (s * 100.0 + 20.0).min(90.0),
        (l * 100.0 - 10.0).max(40.0)
    );
    format!("linear-gradient(135deg, {dark} 0%, {light} 100%)")
}

/// Add `px` to bare numbers; values with units and CSS keywords pass through
pub fn format_css_value(value: &str) -> String {
    let trimmed = value.trim();
    if CSS_UNIT_RE.is_match(trimmed) || CSS_KEYWORD_RE.is_match(trimmed) {
        return trimmed.to_string();
    }
    match trimmed.parse::<f64>() {
        Ok(n) if n.is_finite() && n.to_string() == trimmed => format!("{n}px"),
        _ => value.to_string(),
    }
}

/// CSS custom properties for `config`, in application order
///
/// Empty config values are skipped; the hover variables are only set when
/// cards are hoverable.
pub fn theme_variables(config: &DashboardConfig) -> Vec<(&'static str, String)> {
    let mut vars = Vec::new();
    let mut set = |name: &'static str, value: &str| {
        if !value.is_empty() {
            vars.push((name, value.to_string()));
        }
    };

    set("--body-background", &config.body_background);
    set("--body-background-image", &config.body_background_image.join(", "));
    set("--base-font-size", &config.base_font_size);
    set("--body-font-family", &config.body_font_family);
    set("--color-primary", &config.colors_primary);
    set("--color-success", &config.colors_success);
    set("--color-warning", &config.colors_warning);
    set("--color-error", &config.colors_error);
    set("--color-text-primary", &config.colors_text_primary);
    set("--color-text-secondary", &config.colors_text_secondary);
    set("--color-border", &config.colors_border);
    set("--card-background", &config.card_background);
    set("--card-title-font-size", &formatted(&config.card_title_font_size));
    set("--card-border-width", &formatted(&config.card_border_width));
    set("--card-border-color", &config.card_border_color);
    set("--card-border-style", &config.card_border_style);
    set("--card-border-radius", &formatted(&config.card_border_radius));
    set("--card-gap", &formatted(&config.card_gap));
    set("--card-shadow", &config.card_shadow);

    if config.interaction_card_hoverable {
        set("--card-hover-border-color", &config.card_hover_border_color);
        set("--card-hover-border-style", &config.card_hover_border_style);
        set("--card-hover-shadow", &config.card_hover_shadow);
        set("--card-hover-enabled", "1");
    } else {
        set("--card-hover-enabled", "0");
    }

    // Older stylesheets read these names
    set("--color-card-bg", &config.card_background);
    set("--border-radius-small", &formatted(&config.card_border_radius));
    set("--shadow-card", &config.card_shadow);
    set("--shadow-hover", &config.card_hover_shadow);
    vars
}

fn formatted(value: &str) -> String {
    if value.is_empty() {
        String::new()
    } else {
        format_css_value(value)
    }
}

/// Write the theme variables onto the document root element
pub fn apply_theme(config: &DashboardConfig) -> Result<(), JsValue> {
    let window = web_sys::window().ok_or("no window")?;
    let document = window.document().ok_or("no document")?;
    let root = document
        .document_element()
        .ok_or("no document element")?
        .dyn_into::<web_sys::HtmlElement>()?;
    let style = root.style();
    for (name, value) in theme_variables(config) {
        style.set_property(name, &value)?;
    }
    Ok(())
}
