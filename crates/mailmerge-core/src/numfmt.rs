//! Spreadsheet number formats
//!
//! Renders a numeric cell through its format code (`$#,##0.00`, `0%`,
//! `yyyy-mm-dd`, ...) the way a spreadsheet viewer shows it. Cells without a
//! format code use the "General" rules: at most 10 significant digits, and
//! scientific notation for very large or very small values.

use chrono::{Datelike, NaiveDate, NaiveDateTime, TimeDelta, Timelike};

/// Built-in format codes that workbooks refer to by id only
pub fn builtin_format(id: u32) -> Option<&'static str> {
    let code = match id {
        0 => "General",
        1 => "0",
        2 => "0.00",
        3 => "#,##0",
        4 => "#,##0.00",
        5 => "\"$\"#,##0_);(\"$\"#,##0)",
        6 => "\"$\"#,##0_);[Red](\"$\"#,##0)",
        7 => "\"$\"#,##0.00_);(\"$\"#,##0.00)",
        8 => "\"$\"#,##0.00_);[Red](\"$\"#,##0.00)",
        9 => "0%",
        10 => "0.00%",
        11 => "0.00E+00",
        12 => "# ?/?",
        13 => "# ??/??",
        14 => "m/d/yy",
        15 => "d-mmm-yy",
        16 => "d-mmm",
        17 => "mmm-yy",
        18 => "h:mm AM/PM",
        19 => "h:mm:ss AM/PM",
        20 => "h:mm",
        21 => "h:mm:ss",
        22 => "m/d/yy h:mm",
        37 => "#,##0 ;(#,##0)",
        38 => "#,##0 ;[Red](#,##0)",
        39 => "#,##0.00;(#,##0.00)",
        40 => "#,##0.00;[Red](#,##0.00)",
        45 => "mm:ss",
        46 => "[h]:mm:ss",
        47 => "mmss.0",
        48 => "##0.0E+0",
        49 => "@",
        _ => return None,
    };
    Some(code)
}

/// Render `value` with an Excel-style format code
pub fn format_number(value: f64, code: &str) -> String {
    if !value.is_finite() {
        return value.to_string();
    }

    let sections = split_sections(code);
    let (section, magnitude, negative) = match (sections.as_slice(), value) {
        ([only], v) => (*only, v.abs(), v < 0.0),
        ([_, negative, ..], v) if v < 0.0 => (*negative, v.abs(), false),
        ([_, _, zero, ..], v) if v == 0.0 => (*zero, 0.0, false),
        ([positive, ..], v) => (*positive, v, false),
        ([], v) => ("General", v.abs(), v < 0.0),
    };

    let tokens = tokenize(section);
    let text = if tokens.iter().any(Token::is_date) {
        format_date(magnitude, &tokens).unwrap_or_else(|| format_general(magnitude))
    } else if tokens.iter().any(|t| matches!(t, Token::Literal(s) if s == "/")) {
        // Fractions are shown as decimals
        format_general(magnitude)
    } else {
        format_numeric(magnitude, &tokens)
    };

    if negative && text.chars().any(|c| c.is_ascii_digit() && c != '0') {
        format!("-{}", text)
    } else {
        text
    }
}

/// Excel's "General" format: up to 10 significant digits
pub fn format_general(value: f64) -> String {
    if value == 0.0 || !value.is_finite() {
        return if value.is_finite() {
            "0".to_string()
        } else {
            value.to_string()
        };
    }

    let sign = if value < 0.0 { "-" } else { "" };
    let abs = value.abs();

    if !(1e-9..1e11).contains(&abs) {
        let text = format!("{:.5E}", abs);
        let (mantissa, exponent) = text.split_once('E').unwrap_or((text.as_str(), "0"));
        let exponent: i32 = exponent.parse().unwrap_or(0);
        let exp_sign = if exponent < 0 { '-' } else { '+' };
        return format!(
            "{}{}E{}{:02}",
            sign,
            trim_fraction(mantissa),
            exp_sign,
            exponent.abs()
        );
    }

    // Eleven characters wide, counting the leading zero of values below one
    let int_digits = (abs.log10().floor() as i32 + 1).max(1);
    let decimals = (10 - int_digits).max(0) as usize;
    format!("{}{}", sign, trim_fraction(&format!("{:.*}", decimals, abs)))
}

/// Days since 1899-12-30 for a calendar date and time
pub fn datetime_to_serial(datetime: NaiveDateTime) -> Option<f64> {
    let epoch = NaiveDate::from_ymd_opt(1899, 12, 30)?.and_hms_opt(0, 0, 0)?;
    let millis = datetime.signed_duration_since(epoch).num_milliseconds();
    let serial = millis as f64 / 86_400_000.0;
    // Serials before March 1900 count the non-existent 1900-02-29
    Some(if serial < 61.0 { serial - 1.0 } else { serial })
}

fn trim_fraction(text: &str) -> &str {
    if text.contains('.') {
        text.trim_end_matches('0').trim_end_matches('.')
    } else {
        text
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Literal(String),
    /// `0`, `#` or `?`
    Digit(char),
    Point,
    Comma,
    Percent,
    Exponent { plus: bool },
    General,
    Text,
    /// Run of one date letter, lowercased (`yyyy`, `mm`, `d`, ...)
    Date(String),
    /// `[h]`, `[mm]`, `[ss]`
    Elapsed(char),
    /// `AM/PM` when true, `A/P` when false
    AmPm(bool),
}

impl Token {
    fn is_date(&self) -> bool {
        matches!(self, Token::Date(_) | Token::Elapsed(_) | Token::AmPm(_))
    }

    fn is_placeholder(&self) -> bool {
        matches!(self, Token::Digit(_) | Token::Point)
    }
}

/// Split on `;` outside quotes, brackets and escapes
fn split_sections(code: &str) -> Vec<&str> {
    let mut sections = Vec::new();
    let mut start = 0;
    let mut in_quotes = false;
    let mut in_brackets = false;
    let mut escaped = false;

    for (i, c) in code.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if !in_quotes => escaped = true,
            '"' => in_quotes = !in_quotes,
            '[' if !in_quotes => in_brackets = true,
            ']' if !in_quotes => in_brackets = false,
            ';' if !in_quotes && !in_brackets => {
                sections.push(&code[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    sections.push(&code[start..]);
    sections
}

fn starts_with_ignore_case(chars: &[char], word: &str) -> bool {
    let mut rest = chars.iter();
    word.chars()
        .all(|w| rest.next().is_some_and(|c| c.eq_ignore_ascii_case(&w)))
}

fn tokenize(section: &str) -> Vec<Token> {
    let chars: Vec<char> = section.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let rest = &chars[i..];
        match c {
            '"' => {
                let end = rest[1..]
                    .iter()
                    .position(|&q| q == '"')
                    .map_or(chars.len(), |p| i + 1 + p);
                tokens.push(Token::Literal(chars[i + 1..end].iter().collect()));
                i = end + 1;
            }
            '\\' => {
                if let Some(&next) = chars.get(i + 1) {
                    tokens.push(Token::Literal(next.to_string()));
                }
                i += 2;
            }
            // `_x` leaves room for x, `*x` fills with x
            '_' => {
                tokens.push(Token::Literal(" ".to_string()));
                i += 2;
            }
            '*' => i += 2,
            '[' => {
                let end = rest
                    .iter()
                    .position(|&b| b == ']')
                    .map_or(chars.len(), |p| i + p);
                let inner: String = chars[i + 1..end].iter().collect();
                if let Some(currency) = inner.strip_prefix('$') {
                    let symbol = currency.split('-').next().unwrap_or_default();
                    tokens.push(Token::Literal(symbol.to_string()));
                } else if let Some(unit) = elapsed_unit(&inner) {
                    tokens.push(Token::Elapsed(unit));
                }
                // Colors and conditions are not rendered
                i = end + 1;
            }
            '0' | '#' | '?' => {
                tokens.push(Token::Digit(c));
                i += 1;
            }
            '.' => {
                tokens.push(Token::Point);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '%' => {
                tokens.push(Token::Percent);
                i += 1;
            }
            '@' => {
                tokens.push(Token::Text);
                i += 1;
            }
            'E' | 'e' if matches!(chars.get(i + 1), Some('+') | Some('-')) => {
                tokens.push(Token::Exponent {
                    plus: chars[i + 1] == '+',
                });
                i += 2;
            }
            _ if starts_with_ignore_case(rest, "general") => {
                tokens.push(Token::General);
                i += "general".len();
            }
            _ if starts_with_ignore_case(rest, "am/pm") => {
                tokens.push(Token::AmPm(true));
                i += "am/pm".len();
            }
            _ if starts_with_ignore_case(rest, "a/p") => {
                tokens.push(Token::AmPm(false));
                i += "a/p".len();
            }
            'y' | 'Y' | 'm' | 'M' | 'd' | 'D' | 'h' | 'H' | 's' | 'S' => {
                let letter = c.to_ascii_lowercase();
                let run = rest
                    .iter()
                    .take_while(|r| r.to_ascii_lowercase() == letter)
                    .count();
                tokens.push(Token::Date(letter.to_string().repeat(run)));
                i += run;
            }
            _ => {
                tokens.push(Token::Literal(c.to_string()));
                i += 1;
            }
        }
    }
    tokens
}

fn elapsed_unit(inner: &str) -> Option<char> {
    let first = inner.chars().next()?.to_ascii_lowercase();
    let same = inner.chars().all(|c| c.to_ascii_lowercase() == first);
    (same && matches!(first, 'h' | 'm' | 's')).then_some(first)
}

fn placeholders(tokens: &[Token]) -> Vec<char> {
    tokens
        .iter()
        .filter_map(|t| match t {
            Token::Digit(d) => Some(*d),
            _ => None,
        })
        .collect()
}

fn format_numeric(value: f64, tokens: &[Token]) -> String {
    let percent = tokens.iter().filter(|t| **t == Token::Percent).count();
    let mut value = value * 100f64.powi(percent as i32);

    let Some(first) = tokens.iter().position(Token::is_placeholder) else {
        // No digits in the section: literals, maybe General or @
        return tokens
            .iter()
            .map(|t| match t {
                Token::Literal(s) => s.clone(),
                Token::General | Token::Text => format_general(value),
                Token::Percent => "%".to_string(),
                _ => String::new(),
            })
            .collect();
    };
    let last = tokens
        .iter()
        .rposition(|t| t.is_placeholder() || matches!(t, Token::Comma | Token::Exponent { .. }))
        .unwrap_or(first)
        .max(first);

    let exponent = tokens[first..=last]
        .iter()
        .position(|t| matches!(t, Token::Exponent { .. }))
        .map(|p| first + p);
    let mantissa = &tokens[first..exponent.unwrap_or(last + 1)];

    // Commas after the last digit placeholder scale by a thousand each
    let scaling = mantissa
        .iter()
        .rev()
        .take_while(|t| **t == Token::Comma)
        .count();
    value /= 1000f64.powi(scaling as i32);
    let mantissa = &mantissa[..mantissa.len() - scaling];

    let point = mantissa.iter().position(|t| *t == Token::Point);
    let (int_part, frac_part) = match point {
        Some(p) => (&mantissa[..p], &mantissa[p + 1..]),
        None => (mantissa, &[][..]),
    };
    let int_digits = placeholders(int_part);
    let frac_digits = placeholders(frac_part);
    let grouping = int_part.contains(&Token::Comma);

    let mut exponent_text = String::new();
    if let Some(e) = exponent {
        let plus = matches!(tokens[e], Token::Exponent { plus: true });
        let width = placeholders(&tokens[e + 1..=last]).len().max(1);
        let mut exp = if value == 0.0 {
            0
        } else {
            value.log10().floor() as i32
        };
        let mut mantissa_value = value / 10f64.powi(exp);
        if round_half_away(mantissa_value, frac_digits.len()) >= 10.0 {
            exp += 1;
            mantissa_value = value / 10f64.powi(exp);
        }
        value = mantissa_value;
        let sign = match (exp < 0, plus) {
            (true, _) => "-",
            (false, true) => "+",
            (false, false) => "",
        };
        exponent_text = format!("E{}{:0width$}", sign, exp.abs(), width = width);
    }

    let number = render_fixed(value, &int_digits, &frac_digits, grouping, point.is_some());

    let mut out = String::new();
    for (i, token) in tokens.iter().enumerate() {
        if i == first {
            out.push_str(&number);
            out.push_str(&exponent_text);
            continue;
        }
        match token {
            Token::Literal(s) => out.push_str(s),
            Token::Percent => out.push('%'),
            _ => {}
        }
    }
    out
}

fn round_half_away(value: f64, decimals: usize) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}

fn render_fixed(
    value: f64,
    int_digits: &[char],
    frac_digits: &[char],
    grouping: bool,
    has_point: bool,
) -> String {
    let text = format!("{:.*}", frac_digits.len(), round_half_away(value, frac_digits.len()));
    let (int_text, frac_text) = text.split_once('.').unwrap_or((text.as_str(), ""));

    let required = int_digits.iter().filter(|d| **d == '0').count();
    let mut int_text = if int_text == "0" && required == 0 {
        String::new()
    } else {
        int_text.to_string()
    };
    while int_text.len() < required {
        int_text.insert(0, '0');
    }
    if grouping {
        int_text = group_thousands(&int_text);
    }

    // Optional decimal places drop their trailing zeros
    let mut frac: Vec<char> = frac_text.chars().collect();
    while let Some(&digit) = frac.last() {
        if digit != '0' || frac_digits[frac.len() - 1] == '0' {
            break;
        }
        frac.pop();
    }

    let mut out = int_text;
    if has_point {
        out.push('.');
        out.extend(frac);
    }
    out
}

fn group_thousands(digits: &str) -> String {
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

/// Serial day number (1900 date system) to a date and time
fn serial_to_datetime(serial: f64, whole_seconds: bool) -> Option<NaiveDateTime> {
    if !(0.0..2_958_466.0).contains(&serial) {
        return None;
    }
    let mut millis = (serial * 86_400_000.0).round() as i64;
    if whole_seconds {
        millis = (millis + 500) / 1000 * 1000;
    }
    // Serial 1 is 1900-01-01, and 1900 is wrongly counted as a leap year
    let epoch = if serial < 61.0 {
        NaiveDate::from_ymd_opt(1899, 12, 31)?
    } else {
        NaiveDate::from_ymd_opt(1899, 12, 30)?
    };
    epoch
        .and_hms_opt(0, 0, 0)?
        .checked_add_signed(TimeDelta::try_milliseconds(millis)?)
}

fn format_date(serial: f64, tokens: &[Token]) -> Option<String> {
    let subsecond = tokens
        .windows(2)
        .any(|w| w[0] == Token::Point && matches!(w[1], Token::Digit(_)));
    let datetime = serial_to_datetime(serial, !subsecond)?;
    let twelve_hour = tokens.iter().any(|t| matches!(t, Token::AmPm(_)));
    let millis = format!("{:03}", datetime.nanosecond() / 1_000_000);
    let mut millis = millis.chars();

    let mut out = String::new();
    for (i, token) in tokens.iter().enumerate() {
        match token {
            Token::Literal(s) => out.push_str(s),
            Token::Date(run) => {
                out.push_str(&date_part(run, &datetime, is_minute(tokens, i), twelve_hour))
            }
            Token::Elapsed(unit) => {
                let per_day = match unit {
                    'h' => 24.0,
                    'm' => 1440.0,
                    _ => 86_400.0,
                };
                out.push_str(&((serial * per_day).floor() as i64).to_string());
            }
            Token::AmPm(full) => {
                let pm = datetime.hour() >= 12;
                out.push_str(match (full, pm) {
                    (true, false) => "AM",
                    (true, true) => "PM",
                    (false, false) => "A",
                    (false, true) => "P",
                });
            }
            Token::Point => out.push('.'),
            Token::Digit(_) => out.push(millis.next().unwrap_or('0')),
            Token::Comma => out.push(','),
            Token::Percent => out.push('%'),
            _ => {}
        }
    }
    Some(out)
}

/// `m` means minutes right after an hour or right before a second
fn is_minute(tokens: &[Token], index: usize) -> bool {
    let Token::Date(run) = &tokens[index] else {
        return false;
    };
    if !run.starts_with('m') || run.len() > 2 {
        return false;
    }
    let before = tokens[..index].iter().rev().find(|t| t.is_date());
    let after = tokens[index + 1..].iter().find(|t| t.is_date());
    let after_hour = matches!(before, Some(Token::Date(r)) if r.starts_with('h'))
        || matches!(before, Some(Token::Elapsed('h')));
    let before_second = matches!(after, Some(Token::Date(r)) if r.starts_with('s'));
    after_hour || before_second
}

fn date_part(run: &str, dt: &NaiveDateTime, minute: bool, twelve_hour: bool) -> String {
    let letter = run.chars().next().unwrap_or_default();
    match (letter, run.len()) {
        ('y', 1 | 2) => format!("{:02}", dt.year() % 100),
        ('y', _) => format!("{:04}", dt.year()),
        ('m', 1) if minute => dt.minute().to_string(),
        ('m', _) if minute => format!("{:02}", dt.minute()),
        ('m', 1) => dt.month().to_string(),
        ('m', 2) => format!("{:02}", dt.month()),
        ('m', 3) => dt.format("%b").to_string(),
        ('m', 5) => dt.format("%B").to_string().chars().take(1).collect(),
        ('m', _) => dt.format("%B").to_string(),
        ('d', 1) => dt.day().to_string(),
        ('d', 2) => format!("{:02}", dt.day()),
        ('d', 3) => dt.format("%a").to_string(),
        ('d', _) => dt.format("%A").to_string(),
        ('h', n) => {
            let hour = match (twelve_hour, dt.hour() % 12) {
                (true, 0) => 12,
                (true, h) => h,
                (false, _) => dt.hour(),
            };
            if n == 1 {
                hour.to_string()
            } else {
                format!("{:02}", hour)
            }
        }
        ('s', 1) => dt.second().to_string(),
        ('s', _) => format!("{:02}", dt.second()),
        _ => run.to_string(),
    }
}
