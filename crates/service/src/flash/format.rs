//! printf-style rendering of flash templates.
//!
//! Supported specifiers: `%s` `%d` `%i` `%f` `%j` `%o` `%O` and `%%`.
//! A specifier with no argument left, or one that is not recognised, is kept
//! as written. Arguments left over after the template is exhausted are
//! appended, separated by spaces.

use serde_json::Value;

pub fn format(template: &str, args: &[Value]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut args = args.iter();
    let mut chars = template.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        let Some(&spec) = chars.peek() else {
            out.push('%');
            break;
        };
        if spec == '%' {
            chars.next();
            out.push('%');
            continue;
        }
        if !matches!(spec, 's' | 'd' | 'i' | 'f' | 'j' | 'o' | 'O') {
            out.push('%');
            continue;
        }
        match args.next() {
            Some(arg) => {
                chars.next();
                out.push_str(&render(spec, arg));
            }
            None => out.push('%'),
        }
    }

    for extra in args {
        out.push(' ');
        out.push_str(&as_string(extra));
    }
    out
}

fn render(spec: char, arg: &Value) -> String {
    match spec {
        's' => as_string(arg),
        'd' => number_repr(to_number(arg)),
        'i' => number_repr(to_int(arg)),
        'f' => number_repr(to_float(arg)),
        _ => as_json(arg),
    }
}

fn as_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        other => as_json(other),
    }
}

fn as_json(v: &Value) -> String {
    serde_json::to_string(v).unwrap_or_else(|_| "[Circular]".into())
}

fn to_number(v: &Value) -> f64 {
    match v {
        Value::Number(n) => n.as_f64().unwrap_or(f64::NAN),
        Value::String(s) => {
            let t = s.trim();
            if t.is_empty() { 0.0 } else { t.parse::<f64>().unwrap_or(f64::NAN) }
        }
        Value::Bool(b) => if *b { 1.0 } else { 0.0 },
        Value::Null => 0.0,
        _ => f64::NAN,
    }
}

/// Leading-float parse: `"3.5px"` is 3.5, `"1e3"` is 1000, `"px"` is NaN.
fn to_float(v: &Value) -> f64 {
    match v {
        Value::String(s) => {
            let t = s.trim_start();
            let end = float_prefix_len(t);
            if end == 0 { f64::NAN } else { t[..end].parse::<f64>().unwrap_or(f64::NAN) }
        }
        Value::Number(n) => n.as_f64().unwrap_or(f64::NAN),
        _ => f64::NAN,
    }
}

/// Leading-integer parse: `"42px"` is 42, `"7.9"` is 7, `"px"` is NaN.
fn to_int(v: &Value) -> f64 {
    match v {
        Value::String(s) => {
            let t = s.trim_start();
            let b = t.as_bytes();
            let sign = usize::from(matches!(b.first(), Some(b'+' | b'-')));
            let digits = count_digits(&b[sign..]);
            if digits == 0 { f64::NAN } else { t[..sign + digits].parse::<f64>().unwrap_or(f64::NAN) }
        }
        Value::Number(n) => n.as_f64().map(f64::trunc).unwrap_or(f64::NAN),
        _ => f64::NAN,
    }
}

fn count_digits(b: &[u8]) -> usize {
    b.iter().take_while(|c| c.is_ascii_digit()).count()
}

/// Byte length of the longest `[+-]digits[.digits][e[+-]digits]` prefix; 0 when
/// no mantissa digit is present.
fn float_prefix_len(t: &str) -> usize {
    let b = t.as_bytes();
    let mut i = usize::from(matches!(b.first(), Some(b'+' | b'-')));
    let int_digits = count_digits(&b[i..]);
    i += int_digits;
    let mut frac_digits = 0;
    if b.get(i) == Some(&b'.') {
        frac_digits = count_digits(&b[i + 1..]);
        if int_digits > 0 || frac_digits > 0 {
            i += 1 + frac_digits;
        }
    }
    if int_digits == 0 && frac_digits == 0 {
        return 0;
    }
    if matches!(b.get(i), Some(b'e' | b'E')) {
        let mut j = i + 1;
        if matches!(b.get(j), Some(b'+' | b'-')) {
            j += 1;
        }
        let exp_digits = count_digits(&b[j..]);
        if exp_digits > 0 {
            i = j + exp_digits;
        }
    }
    i
}

fn number_repr(n: f64) -> String {
    if n.is_nan() {
        "NaN".into()
    } else if n.is_infinite() {
        if n > 0.0 { "Infinity".into() } else { "-Infinity".into() }
    } else {
        n.to_string()
    }
}
