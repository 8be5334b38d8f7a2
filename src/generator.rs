use rand::rngs::OsRng;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

pub const MIN_LENGTH: usize = 8;
pub const MAX_LENGTH: usize = 128;
pub const DEFAULT_LENGTH: usize = 16;

struct CharClass {
    all: &'static [u8],
    unambiguous: &'static [u8],
}

const UPPER: CharClass = CharClass {
    all: b"ABCDEFGHIJKLMNOPQRSTUVWXYZ",
    unambiguous: b"ABCDEFGHJKLMNPQRSTUVWXYZ",
};
const LOWER: CharClass = CharClass {
    all: b"abcdefghijklmnopqrstuvwxyz",
    unambiguous: b"abcdefghijkmnopqrstuvwxyz",
};
const DIGITS: CharClass = CharClass {
    all: b"0123456789",
    unambiguous: b"23456789",
};
const SYMBOLS: CharClass = CharClass {
    all: b"!@#$%^&*()-_=+[]{};:,.?/|~",
    unambiguous: b"!@#$%^&*()-_=+[]{};:,.?",
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorOptions {
    pub length: usize,
    pub uppercase: bool,
    pub lowercase: bool,
    pub digits: bool,
    pub symbols: bool,
    /// Drops look-alike characters such as `0`/`O` and `1`/`l`/`I`.
    pub exclude_ambiguous: bool,
}

impl Default for GeneratorOptions {
    fn default() -> Self {
        Self {
            length: DEFAULT_LENGTH,
            uppercase: true,
            lowercase: true,
            digits: true,
            symbols: true,
            exclude_ambiguous: false,
        }
    }
}

impl GeneratorOptions {
    fn classes(&self) -> Vec<&'static [u8]> {
        let pick = |class: &CharClass| {
            if self.exclude_ambiguous {
                class.unambiguous
            } else {
                class.all
            }
        };
        let mut classes = Vec::with_capacity(4);
        if self.uppercase {
            classes.push(pick(&UPPER));
        }
        if self.lowercase {
            classes.push(pick(&LOWER));
        }
        if self.digits {
            classes.push(pick(&DIGITS));
        }
        if self.symbols {
            classes.push(pick(&SYMBOLS));
        }
        if classes.is_empty() {
            classes.push(pick(&LOWER));
            classes.push(pick(&DIGITS));
        }
        classes
    }
}

fn pick_from(set: &[u8], rng: &mut OsRng) -> char {
    set[rng.gen_range(0..set.len())] as char
}

/// One character from every enabled class, the rest from their union, then
/// shuffled.
pub fn generate(options: &GeneratorOptions) -> String {
    let length = options.length.clamp(MIN_LENGTH, MAX_LENGTH);
    let classes = options.classes();
    let mut rng = OsRng;

    let mut chars: Vec<char> = classes.iter().map(|set| pick_from(set, &mut rng)).collect();
    let all: Vec<u8> = classes.concat();
    while chars.len() < length {
        chars.push(pick_from(&all, &mut rng));
    }
    chars.shuffle(&mut rng);
    chars.into_iter().collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Strength {
    Weak,
    Average,
    Strong,
    Excellent,
}

impl Strength {
    pub fn label(self) -> &'static str {
        match self {
            Self::Weak => "Weak",
            Self::Average => "Average",
            Self::Strong => "Strong",
            Self::Excellent => "Excellent",
        }
    }

    /// 1 (weak) through 4 (excellent).
    pub fn level(self) -> u8 {
        self as u8 + 1
    }
}

pub fn classify_strength(password: &str) -> Strength {
    let len = password.chars().count();
    if len < 8 {
        return Strength::Weak;
    }

    let checks = [
        password.chars().any(|c| c.is_ascii_lowercase()),
        password.chars().any(|c| c.is_ascii_uppercase()),
        password.chars().any(|c| c.is_ascii_digit()),
        password
            .chars()
            .any(|c| !c.is_ascii_alphanumeric() && !c.is_whitespace()),
        len >= 8,
        len >= 12,
        len >= 16,
        len >= 20,
    ];
    match checks.iter().filter(|hit| **hit).count() {
        0..=3 => Strength::Weak,
        4..=5 => Strength::Average,
        6..=7 => Strength::Strong,
        _ => Strength::Excellent,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn has_any(text: &str, set: &[u8]) -> bool {
        text.bytes().any(|b| set.contains(&b))
    }

    #[test]
    fn length_is_clamped() {
        let short = GeneratorOptions {
            length: 2,
            ..GeneratorOptions::default()
        };
        assert_eq!(generate(&short).chars().count(), MIN_LENGTH);
        let long = GeneratorOptions {
            length: 1000,
            ..GeneratorOptions::default()
        };
        assert_eq!(generate(&long).chars().count(), MAX_LENGTH);
        assert_eq!(
            generate(&GeneratorOptions::default()).chars().count(),
            DEFAULT_LENGTH
        );
    }

    #[test]
    fn every_enabled_class_appears() {
        let options = GeneratorOptions {
            length: MIN_LENGTH,
            ..GeneratorOptions::default()
        };
        for _ in 0..50 {
            let pw = generate(&options);
            assert!(has_any(&pw, UPPER.all));
            assert!(has_any(&pw, LOWER.all));
            assert!(has_any(&pw, DIGITS.all));
            assert!(has_any(&pw, SYMBOLS.all));
        }
    }

    #[test]
    fn no_class_falls_back_to_lowercase_and_digits() {
        let options = GeneratorOptions {
            uppercase: false,
            lowercase: false,
            digits: false,
            symbols: false,
            ..GeneratorOptions::default()
        };
        let pw = generate(&options);
        assert!(pw
            .bytes()
            .all(|b| LOWER.all.contains(&b) || DIGITS.all.contains(&b)));
        assert!(has_any(&pw, LOWER.all) && has_any(&pw, DIGITS.all));
    }

    #[test]
    fn ambiguous_characters_can_be_excluded() {
        let options = GeneratorOptions {
            length: MAX_LENGTH,
            exclude_ambiguous: true,
            ..GeneratorOptions::default()
        };
        let pw = generate(&options);
        assert!(!pw.contains(['0', 'O', '1', 'l', 'I']));
    }

    #[test]
    fn strength_levels() {
        assert_eq!(classify_strength("abc"), Strength::Weak);
        assert_eq!(classify_strength("abcdefgh"), Strength::Weak);
        assert_eq!(classify_strength("abcdefG1"), Strength::Average);
        assert_eq!(classify_strength("abcdefG1!xyz"), Strength::Strong);
        assert_eq!(classify_strength("abcdefG1!xyzabcdefgh"), Strength::Excellent);
        assert_eq!(Strength::Excellent.level(), 4);
    }
}
