use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs::File;
use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Mutex;

/// Output encoding for the per-call cost log, grounded on the original
/// `ApiCostFormat` enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CostLogFormat {
    Text,
    Html,
    Csv,
}

/// Already-parsed configuration for the cost log. Parsing the raw
/// `key=value,key=value` environment-variable surface itself is this crate's
/// job (see [`CostLogConfig::parse`]); reading the actual process
/// environment is left to the tracer host.
#[derive(Debug, Clone)]
pub struct CostLogConfig {
    pub output_dir: PathBuf,
    pub format: CostLogFormat,
    pub frame_range: (u64, u64),
}

impl Default for CostLogConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("./"),
            format: CostLogFormat::Csv,
            frame_range: (0, u64::MAX),
        }
    }
}

impl CostLogConfig {
    /// Parses the `path=...,format=...,range=min,max` surface the original
    /// tool reads from its `APICOST` environment variable. Unknown keys are
    /// ignored; missing keys keep their default.
    #[must_use]
    pub fn parse(value: &str) -> Self {
        let mut config = Self::default();

        for entry in value.split(',') {
            let Some((key, val)) = entry.split_once('=') else { continue };
            match key.trim() {
                "path" => config.output_dir = PathBuf::from(val.trim()),
                "format" => {
                    config.format = match val.trim().to_ascii_lowercase().as_str() {
                        "html" => CostLogFormat::Html,
                        "text" => CostLogFormat::Text,
                        _ => CostLogFormat::Csv,
                    };
                }
                "range" => {
                    if let Some((min, max)) = val.split_once(',') {
                        let min = min.trim().parse().unwrap_or(0);
                        let max = max.trim().parse().unwrap_or(u64::MAX);
                        config.frame_range = (min, max);
                    }
                }
                _ => {}
            }
        }

        config
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct ApiStatInfo {
    call_count: u64,
    cost_sum_ns: u64,
}

struct Inner {
    config: CostLogConfig,
    frame_count: u64,
    stats: BTreeMap<String, ApiStatInfo>,
}

/// Process-wide accumulator of `(call_count, total_cost)` per packet kind,
/// rendered to a file in one of three formats on drop.
///
/// This is a side collaborator: it never touches the trace-file stream or
/// header. Accounting is gated by `config.frame_range`, mirroring the
/// original's per-frame recording window.
pub struct CostLog {
    inner: Mutex<Inner>,
}

impl CostLog {
    #[must_use]
    pub fn new(config: CostLogConfig) -> Self {
        Self {
            inner: Mutex::new(Inner {
                config,
                frame_count: 0,
                stats: BTreeMap::new(),
            }),
        }
    }

    /// Advances the frame counter used to gate recording against
    /// `frame_range`.
    pub fn next_frame(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        inner.frame_count += 1;
    }

    /// Records one call's cost, if the current frame is within the
    /// configured range.
    pub fn record(&self, packet_kind: &str, cost_ns: u64) {
        let mut inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let (min, max) = inner.config.frame_range;
        if inner.frame_count < min || inner.frame_count > max {
            return;
        }
        let entry = inner.stats.entry(packet_kind.to_owned()).or_default();
        entry.call_count += 1;
        entry.cost_sum_ns += cost_ns;
    }

    /// Renders the accumulated table to `<output_dir>/vk_apicost.<ext>` in
    /// the configured format. Called once, at tracer teardown.
    pub fn flush_to_file(&self) -> std::io::Result<()> {
        let inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let ext = match inner.config.format {
            CostLogFormat::Csv => "csv",
            CostLogFormat::Text => "txt",
            CostLogFormat::Html => "html",
        };
        let path = inner.config.output_dir.join(format!("gapitrace_apicost.{ext}"));

        let mut file = File::create(&path)?;
        let body = render(&inner.config.format, &inner.stats);
        file.write_all(body.as_bytes())?;
        Ok(())
    }
}

fn render(format: &CostLogFormat, stats: &BTreeMap<String, ApiStatInfo>) -> String {
    let mut out = String::new();
    match format {
        CostLogFormat::Csv => {
            out.push_str("function,count,cost_ns\r\n");
            for (name, stat) in stats {
                let _ = writeln!(out, "{name},{},{}\r", stat.call_count, stat.cost_sum_ns);
            }
        }
        CostLogFormat::Text => {
            for (name, stat) in stats {
                let _ = writeln!(
                    out,
                    "funcname = {name:<48} count = {:<10} cost = {} ns",
                    stat.call_count, stat.cost_sum_ns
                );
            }
        }
        CostLogFormat::Html => {
            out.push_str("<!doctype html><html><head><title>gapitrace api cost</title></head><body><table>\n");
            out.push_str("<tr><th>function</th><th>count</th><th>cost (ns)</th></tr>\n");
            for (name, stat) in stats {
                let _ = writeln!(
                    out,
                    "<tr><td>{name}</td><td>{}</td><td>{}</td></tr>",
                    stat.call_count, stat.cost_sum_ns
                );
            }
            out.push_str("</table></body></html>\n");
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_key_value_surface() {
        let config = CostLogConfig::parse("path=/tmp/trace/,format=Html,range=10,20");
        assert_eq!(config.output_dir, PathBuf::from("/tmp/trace/"));
        assert_eq!(config.format, CostLogFormat::Html);
        assert_eq!(config.frame_range, (10, 20));
    }

    #[test]
    fn unknown_keys_are_ignored_and_defaults_kept() {
        let config = CostLogConfig::parse("bogus=1,format=csv");
        assert_eq!(config.format, CostLogFormat::Csv);
        assert_eq!(config.output_dir, PathBuf::from("./"));
    }

    #[test]
    fn record_respects_frame_range() {
        let log = CostLog::new(CostLogConfig {
            frame_range: (2, 2),
            ..CostLogConfig::default()
        });
        log.record("vkCreateDevice", 100);
        log.next_frame();
        log.next_frame();
        log.record("vkCreateDevice", 200);

        let inner = log.inner.lock().unwrap();
        let stat = inner.stats.get("vkCreateDevice").unwrap();
        assert_eq!(stat.call_count, 1);
        assert_eq!(stat.cost_sum_ns, 200);
    }
}
