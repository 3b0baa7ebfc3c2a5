use colored::{Color, ColoredString, Colorize};

use crate::verdict::StatusCode;

pub fn is_truecolor_supported() -> bool {
    let Ok(v) = std::env::var("COLORTERM") else {
        return false;
    };
    matches!(v.as_str(), "truecolor" | "24bit")
}

pub trait ColorTheme {
    fn color(&self) -> Color;
}

impl ColorTheme for log::Level {
    fn color(&self) -> Color {
        use log::Level::*;
        match self {
            Error => Color::BrightRed,
            Warn => Color::BrightYellow,
            Info => Color::Cyan,
            Debug => Color::Magenta,
            Trace => Color::Blue,
        }
    }
}

impl ColorTheme for StatusCode {
    fn color(&self) -> Color {
        use StatusCode::*;
        if !self::is_truecolor_supported() {
            return match self {
                OK => Color::Green,
                WA | OF => Color::Yellow,
                TLE => Color::Red,
                RE | CE => Color::Magenta,
                IE => Color::BrightRed,
                SKIP | MA => Color::BrightBlack,
            };
        }

        match self {
            OK => Color::TrueColor {
                r: 30,
                g: 180,
                b: 40,
            },
            WA | OF => Color::TrueColor {
                r: 210,
                g: 138,
                b: 4,
            },
            TLE => Color::TrueColor {
                r: 220,
                g: 42,
                b: 42,
            },
            RE | CE => Color::TrueColor {
                r: 171,
                g: 40,
                b: 200,
            },
            IE => Color::TrueColor {
                r: 255,
                g: 60,
                b: 60,
            },
            SKIP | MA => Color::TrueColor {
                r: 128,
                g: 128,
                b: 128,
            },
        }
    }
}

pub fn status_icon(code: StatusCode) -> ColoredString {
    let fg = if is_truecolor_supported() {
        Color::TrueColor {
            r: 255,
            g: 255,
            b: 255,
        }
    } else {
        Color::BrightBlack
    };
    format!(" {} ", code).on_color(code.color()).bold().color(fg)
}
