//! Message filter pipeline.
//!
//! Grounded on the inter-queue manager's `filters.py`: each `[filter.<name>]`
//! section compiles to one `Filter`, tagged "in" or "out" depending on
//! whether it names `in_prefix`/`in_regex` or `out_prefix`/`out_regex`
//! patterns. In-filters run, in declared order, on a message as received;
//! out-filters run, in declared order, once per destination, after the
//! destination's topic has been rewritten. A filter that doesn't match its
//! topic patterns passes the message through untouched. A matching filter
//! either drops the message outright, or leaves its topic and payload alone
//! and only adjusts the MQTT `retain` flag that will accompany the
//! eventual publish.

use serde_json::Value;

use crate::error::{CoreError, Result};

/// Which stage of the pipeline a filter runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterType {
    In,
    Out,
}

/// A compiled topic matcher: one or more alternatives, any of which
/// matching is enough (a filter's patterns are newline-separated in
/// configuration and OR'd together).
#[derive(Debug, Clone)]
pub enum Matcher {
    Prefix(Vec<String>),
    Regex(Vec<regex::Regex>),
}

impl Matcher {
    pub fn matches(&self, topic: &str) -> bool {
        match self {
            Matcher::Prefix(prefixes) => prefixes.iter().any(|p| topic.starts_with(p.as_str())),
            Matcher::Regex(patterns) => patterns.iter().any(|r| r.is_match(topic)),
        }
    }
}

/// The MQTT `retain` flag value threaded through a filter pipeline. Not a
/// plain `bool`: a `json` rewrite may pull out any JSON scalar the payload
/// happens to carry at that path, exactly as the source configuration
/// allows.
#[derive(Debug, Clone, PartialEq)]
pub enum RetainValue {
    Bool(bool),
    Int(i64),
    Json(Value),
}

impl Default for RetainValue {
    fn default() -> Self {
        RetainValue::Bool(false)
    }
}

impl RetainValue {
    /// Whether this value means "publish with the MQTT retain flag set",
    /// the way the original treats any non-zero/non-empty retain outcome
    /// as true rather than requiring it to be exactly `bool`.
    pub fn is_retained(&self) -> bool {
        match self {
            RetainValue::Bool(b) => *b,
            RetainValue::Int(n) => *n != 0,
            RetainValue::Json(v) => match v {
                Value::Null => false,
                Value::Bool(b) => *b,
                Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
                Value::String(s) => !s.is_empty(),
                Value::Array(a) => !a.is_empty(),
                Value::Object(o) => !o.is_empty(),
            },
        }
    }
}

/// What a matching filter does to the `retain` value. `Unchanged` still
/// counts as a match (it only exists for filters whose sole purpose is to
/// drop or pass through; logged but otherwise inert).
#[derive(Debug, Clone)]
pub enum RetainAction {
    Unchanged,
    Fixed(RetainValue),
    JsonPath { path: Vec<String>, fallback: Option<i64> },
}

/// One compiled `[filter.<name>]` section.
#[derive(Debug, Clone)]
pub struct Filter {
    pub name: String,
    pub filter_type: FilterType,
    matcher: Matcher,
    drop: bool,
    retain_action: RetainAction,
}

impl Filter {
    pub fn new(name: impl Into<String>, filter_type: FilterType, matcher: Matcher, drop: bool, retain_action: RetainAction) -> Self {
        Filter { name: name.into(), filter_type, matcher, drop, retain_action }
    }

    /// Substitute the `{{instance-id}}`, `{{prefix}}`, `{{suffix}}`, and
    /// per-queue (`{{inQueue}}`, `{{outQueue}}`, `{{interQueue}}`)
    /// placeholders a filter's pattern lines may reference, at construction
    /// time, before the patterns are compiled.
    pub fn expand_placeholders(pattern: &str, instance_id: &str, prefix: &str, suffix: &str, queues: &[(&str, &str)]) -> String {
        let mut out = pattern.replace("{{instance-id}}", instance_id).replace("{{prefix}}", prefix).replace("{{suffix}}", suffix);
        for (name, value) in queues {
            out = out.replace(&format!("{{{{{name}}}}}"), value);
        }
        out
    }

    /// Apply this filter to a message already at `topic` carrying
    /// `payload` and the pipeline's running `retain` value. Returns `None`
    /// if the filter drops the message, else the (possibly updated)
    /// `retain` value; topic and payload are never altered by a filter.
    pub fn apply(&self, topic: &str, payload: &[u8], retain: RetainValue) -> Option<RetainValue> {
        if !self.matcher.matches(topic) {
            return Some(retain);
        }
        if self.drop {
            return None;
        }
        Some(match &self.retain_action {
            RetainAction::Unchanged => retain,
            RetainAction::Fixed(v) => v.clone(),
            RetainAction::JsonPath { path, fallback } => match extract_json_path(payload, path) {
                Some(v) => RetainValue::Json(v),
                None => match fallback {
                    Some(f) => RetainValue::Int(*f),
                    None => retain,
                },
            },
        })
    }
}

fn extract_json_path(payload: &[u8], path: &[String]) -> Option<Value> {
    let mut cur: Value = serde_json::from_slice(payload).ok()?;
    for segment in path {
        cur = cur.get(segment)?.clone();
    }
    Some(cur)
}

/// An ordered stage of the filter pipeline (all in-filters, or all
/// out-filters for one destination): every filter in declared order is
/// applied in turn, threading `retain` through; the first filter that
/// drops the message short-circuits the rest.
#[derive(Debug, Clone, Default)]
pub struct FilterChain {
    filters: Vec<Filter>,
}

impl FilterChain {
    pub fn new(filters: Vec<Filter>) -> Self {
        FilterChain { filters }
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Run every filter in order. `None` means some filter dropped the
    /// message; `Some(retain)` is the final retain value to publish with.
    pub fn apply(&self, topic: &str, payload: &[u8], mut retain: RetainValue) -> Option<RetainValue> {
        for filter in &self.filters {
            retain = filter.apply(topic, payload, retain)?;
        }
        Some(retain)
    }
}

/// Parse a `json:<dot.separated.path>[ <fallback-int>]` retain spec into a
/// `RetainAction`, the way `filters.py` parses its `retain = ...` value.
pub fn parse_retain_spec(spec: &str) -> Result<RetainAction> {
    let spec = spec.trim();
    if spec.eq_ignore_ascii_case("true") {
        return Ok(RetainAction::Fixed(RetainValue::Bool(true)));
    }
    if spec.eq_ignore_ascii_case("false") {
        return Ok(RetainAction::Fixed(RetainValue::Bool(false)));
    }
    if let Ok(i) = spec.parse::<i64>() {
        return Ok(RetainAction::Fixed(RetainValue::Int(i)));
    }
    if let Some(rest) = spec.strip_prefix("json:") {
        let mut parts = rest.rsplitn(2, ' ');
        let maybe_fallback = parts.next().unwrap_or("");
        if let Ok(fallback) = maybe_fallback.parse::<i64>() {
            let path_spec = parts.next().unwrap_or("");
            return Ok(RetainAction::JsonPath { path: path_spec.split('.').map(String::from).collect(), fallback: Some(fallback) });
        }
        return Ok(RetainAction::JsonPath { path: rest.split('.').map(String::from).collect(), fallback: None });
    }
    Err(CoreError::FilterConfig(format!("unable to parse retain value '{spec}'")))
}

/// Compile one pattern line (prefix or regex, already placeholder-expanded)
/// into a `Matcher`'s variant. The caller already knows which kind a
/// section declares (`*_prefix` vs `*_regex`), so this only compiles, it
/// doesn't sniff.
pub fn compile_prefix_patterns(lines: &[String]) -> Matcher {
    Matcher::Prefix(lines.to_vec())
}

/// Patterns are matched the way Python's `re.match` does: anchored at the
/// start of the topic, not searched for anywhere within it. Wrapping each
/// line in a non-capturing start anchor gets `regex`'s `is_match` (a
/// `search`) to behave like `match`.
pub fn compile_regex_patterns(lines: &[String]) -> Result<Matcher> {
    let mut compiled = Vec::with_capacity(lines.len());
    for line in lines {
        let anchored = format!("^(?:{line})");
        compiled.push(regex::Regex::new(&anchored).map_err(|e| CoreError::FilterConfig(format!("invalid regex '{line}': {e}")))?);
    }
    Ok(Matcher::Regex(compiled))
}

/// Split a filter section's multi-line pattern value into non-empty lines,
/// as `filters.py`'s `filter(None, patterns.split("\n"))` does.
pub fn split_pattern_lines(raw: &str) -> Vec<String> {
    raw.lines().map(str::trim).filter(|l| !l.is_empty()).map(String::from).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn prefix_matcher_matches_any_alternative() {
        let m = Matcher::Prefix(vec!["v2x/cam/".to_string(), "v2x/denm/".to_string()]);
        assert!(m.matches("v2x/cam/abc"));
        assert!(m.matches("v2x/denm/abc"));
        assert!(!m.matches("v2x/cpm/abc"));
    }

    #[test]
    fn regex_matcher_matches_pattern() {
        let m = compile_regex_patterns(&["^v2x/(cam|denm)/.*$".to_string()]).unwrap();
        assert!(m.matches("v2x/cam/abc"));
        assert!(!m.matches("v2x/cpm/abc"));
    }

    #[test]
    fn regex_matcher_is_start_anchored_like_re_match() {
        let m = compile_regex_patterns(&["outQueue/cam".to_string()]).unwrap();
        assert!(m.matches("outQueue/cam/abc"));
        assert!(!m.matches("v2x/outQueue/cam/abc"));
    }

    #[test]
    fn drop_filter_drops_on_match_and_passes_through_otherwise() {
        let filter = Filter::new("drop-cpm", FilterType::In, Matcher::Prefix(vec!["v2x/cpm/".into()]), true, RetainAction::Unchanged);
        assert_eq!(filter.apply("v2x/cpm/abc", b"{}", RetainValue::Bool(false)), None);
        assert_eq!(filter.apply("v2x/cam/abc", b"{}", RetainValue::Bool(false)), Some(RetainValue::Bool(false)));
    }

    #[test]
    fn fixed_retain_overrides_on_match() {
        let filter = Filter::new("force-retain", FilterType::Out, Matcher::Prefix(vec!["v2x/denm/".into()]), false, RetainAction::Fixed(RetainValue::Bool(true)));
        assert_eq!(filter.apply("v2x/denm/abc", b"{}", RetainValue::Bool(false)), Some(RetainValue::Bool(true)));
    }

    #[test]
    fn json_path_retain_extracts_nested_value() {
        let action = RetainAction::JsonPath { path: vec!["message".into(), "station_id".into()], fallback: None };
        let filter = Filter::new("station-retain", FilterType::Out, Matcher::Prefix(vec!["v2x/".into()]), false, action);
        let payload = json!({"message": {"station_id": 42}});
        let outcome = filter.apply("v2x/cam/abc", payload.to_string().as_bytes(), RetainValue::Bool(false));
        assert_eq!(outcome, Some(RetainValue::Json(json!(42))));
    }

    #[test]
    fn json_path_retain_falls_back_on_missing_path() {
        let action = RetainAction::JsonPath { path: vec!["missing".into()], fallback: Some(7) };
        let filter = Filter::new("fallback", FilterType::Out, Matcher::Prefix(vec!["v2x/".into()]), false, action);
        let outcome = filter.apply("v2x/cam/abc", b"{}", RetainValue::Bool(false));
        assert_eq!(outcome, Some(RetainValue::Int(7)));
    }

    #[test]
    fn json_path_retain_keeps_prior_value_without_fallback() {
        let action = RetainAction::JsonPath { path: vec!["missing".into()], fallback: None };
        let filter = Filter::new("no-fallback", FilterType::Out, Matcher::Prefix(vec!["v2x/".into()]), false, action);
        let outcome = filter.apply("v2x/cam/abc", b"{}", RetainValue::Bool(true));
        assert_eq!(outcome, Some(RetainValue::Bool(true)));
    }

    #[test]
    fn chain_short_circuits_on_drop() {
        let chain = FilterChain::new(vec![
            Filter::new("pass", FilterType::In, Matcher::Prefix(vec!["v2x/".into()]), false, RetainAction::Fixed(RetainValue::Bool(true))),
            Filter::new("drop-cpm", FilterType::In, Matcher::Prefix(vec!["v2x/cpm/".into()]), true, RetainAction::Unchanged),
        ]);
        assert_eq!(chain.apply("v2x/cpm/abc", b"{}", RetainValue::default()), None);
        assert_eq!(chain.apply("v2x/cam/abc", b"{}", RetainValue::default()), Some(RetainValue::Bool(true)));
    }

    #[test]
    fn placeholder_expansion_substitutes_instance_prefix_suffix_and_queues() {
        let expanded = Filter::expand_placeholders(
            "{{prefix}}/{{inQueue}}/{{instance-id}}/{{suffix}}",
            "veh-1",
            "v2x",
            "raw",
            &[("inQueue", "inQueue"), ("outQueue", "outQueue")],
        );
        assert_eq!(expanded, "v2x/inQueue/veh-1/raw");
    }

    #[test]
    fn parse_retain_spec_handles_bool_int_and_json() {
        assert!(matches!(parse_retain_spec("true").unwrap(), RetainAction::Fixed(RetainValue::Bool(true))));
        assert!(matches!(parse_retain_spec("3").unwrap(), RetainAction::Fixed(RetainValue::Int(3))));
        match parse_retain_spec("json:message.station_id 0").unwrap() {
            RetainAction::JsonPath { path, fallback } => {
                assert_eq!(path, vec!["message".to_string(), "station_id".to_string()]);
                assert_eq!(fallback, Some(0));
            }
            _ => panic!("expected JsonPath"),
        }
    }

    #[test]
    fn is_retained_treats_nonzero_int_and_truthy_json_as_retained() {
        assert!(!RetainValue::Bool(false).is_retained());
        assert!(RetainValue::Bool(true).is_retained());
        assert!(!RetainValue::Int(0).is_retained());
        assert!(RetainValue::Int(1).is_retained());
        assert!(RetainValue::Json(json!(42)).is_retained());
        assert!(!RetainValue::Json(json!(0)).is_retained());
        assert!(!RetainValue::Json(Value::Null).is_retained());
    }

    #[test]
    fn split_pattern_lines_drops_blank_lines() {
        assert_eq!(split_pattern_lines("a\n\nb\n"), vec!["a".to_string(), "b".to_string()]);
    }
}
