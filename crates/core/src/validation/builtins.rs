use chrono::{NaiveDate, NaiveDateTime};

/// Built-in XSD datatypes with a lexical check. Everything else is a string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Builtin {
    AnySimple,
    Boolean,
    Decimal,
    Double,
    Integer(Sign),
    Date,
    DateTime,
    GYear,
    GYearMonth,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Sign {
    Any,
    NonNegative,
    Positive,
    NonPositive,
    Negative,
}

impl Builtin {
    pub(crate) fn from_local(name: &str) -> Self {
        match name {
            "boolean" => Builtin::Boolean,
            "decimal" => Builtin::Decimal,
            "float" | "double" => Builtin::Double,
            "integer" | "int" | "long" | "short" | "byte" => Builtin::Integer(Sign::Any),
            "nonNegativeInteger" | "unsignedLong" | "unsignedInt" | "unsignedShort"
            | "unsignedByte" => Builtin::Integer(Sign::NonNegative),
            "positiveInteger" => Builtin::Integer(Sign::Positive),
            "nonPositiveInteger" => Builtin::Integer(Sign::NonPositive),
            "negativeInteger" => Builtin::Integer(Sign::Negative),
            "date" => Builtin::Date,
            "dateTime" => Builtin::DateTime,
            "gYear" => Builtin::GYear,
            "gYearMonth" => Builtin::GYearMonth,
            _ => Builtin::AnySimple,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Builtin::AnySimple => "anySimpleType",
            Builtin::Boolean => "boolean",
            Builtin::Decimal => "decimal",
            Builtin::Double => "double",
            Builtin::Integer(Sign::Any) => "integer",
            Builtin::Integer(Sign::NonNegative) => "nonNegativeInteger",
            Builtin::Integer(Sign::Positive) => "positiveInteger",
            Builtin::Integer(Sign::NonPositive) => "nonPositiveInteger",
            Builtin::Integer(Sign::Negative) => "negativeInteger",
            Builtin::Date => "date",
            Builtin::DateTime => "dateTime",
            Builtin::GYear => "gYear",
            Builtin::GYearMonth => "gYearMonth",
        }
    }

    pub(crate) fn check(&self, value: &str) -> Result<(), String> {
        let v = value.trim();
        let ok = match self {
            Builtin::AnySimple => true,
            Builtin::Boolean => matches!(v, "true" | "false" | "1" | "0"),
            Builtin::Decimal => is_decimal(v),
            Builtin::Double => matches!(v, "INF" | "-INF" | "NaN") || v.parse::<f64>().is_ok(),
            Builtin::Integer(sign) => is_integer(v, *sign),
            Builtin::Date => NaiveDate::parse_from_str(strip_timezone(v), "%Y-%m-%d").is_ok(),
            Builtin::DateTime => {
                let v = strip_timezone(v);
                NaiveDateTime::parse_from_str(v, "%Y-%m-%dT%H:%M:%S").is_ok()
                    || NaiveDateTime::parse_from_str(v, "%Y-%m-%dT%H:%M:%S%.f").is_ok()
            }
            Builtin::GYear => is_year(strip_timezone(v)),
            Builtin::GYearMonth => match strip_timezone(v).rsplit_once('-') {
                Some((year, month)) => {
                    is_year(year)
                        && month.len() == 2
                        && matches!(month.parse::<u8>(), Ok(1..=12))
                }
                None => false,
            },
        };
        if ok {
            Ok(())
        } else {
            Err(format!("'{}' is not a valid xs:{}", v, self.name()))
        }
    }
}

fn strip_timezone(v: &str) -> &str {
    if let Some(stripped) = v.strip_suffix('Z') {
        return stripped;
    }
    let bytes = v.as_bytes();
    if bytes.len() > 6 {
        let sign = bytes[bytes.len() - 6];
        if (sign == b'+' || sign == b'-') && bytes[bytes.len() - 3] == b':' {
            return &v[..v.len() - 6];
        }
    }
    v
}

fn is_year(v: &str) -> bool {
    let digits = v.strip_prefix('-').unwrap_or(v);
    digits.len() >= 4 && digits.bytes().all(|b| b.is_ascii_digit())
}

fn split_sign(v: &str) -> (bool, &str) {
    if let Some(rest) = v.strip_prefix('-') {
        (true, rest)
    } else {
        (false, v.strip_prefix('+').unwrap_or(v))
    }
}

fn is_decimal(v: &str) -> bool {
    let (_, rest) = split_sign(v);
    let (int, frac) = rest.split_once('.').unwrap_or((rest, ""));
    (!int.is_empty() || !frac.is_empty())
        && int.bytes().all(|b| b.is_ascii_digit())
        && frac.bytes().all(|b| b.is_ascii_digit())
}

fn is_integer(v: &str, sign: Sign) -> bool {
    let (negative, digits) = split_sign(v);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return false;
    }
    let zero = digits.bytes().all(|b| b == b'0');
    match sign {
        Sign::Any => true,
        Sign::NonNegative => !negative || zero,
        Sign::Positive => !negative && !zero,
        Sign::NonPositive => negative || zero,
        Sign::Negative => negative && !zero,
    }
}
