//! `.milk`-style preset text to [`Preset`].
//!
//! The format is line oriented `key=value`. Code keys carry a numeric suffix
//! (`per_frame_1`, `per_frame_2`, ...) and are concatenated in suffix order
//! before being handed to the equation parser.

use std::collections::BTreeMap;
use std::path::Path;

use super::expr::{self, Program};
use super::vars::{canonical_name, SymbolTable};
use super::{CustomWave, ParseError, Preset, PresetError, ResourceRequirement};

/// Keys that are recognised but carry nothing the engine uses.
const IGNORED_KEYS: &[&str] = &["fWarpAnimSpeed", "MILKDROP_PRESET_VERSION", "PSVERSION"];

/// Code lines of one kind, keyed by suffix.
#[derive(Default)]
struct CodeBlock {
    lines: BTreeMap<u32, Vec<(usize, String)>>,
}

impl CodeBlock {
    fn push(&mut self, index: u32, line: usize, text: &str) {
        self.lines
            .entry(index)
            .or_default()
            .push((line, text.to_string()));
    }

    fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Concatenated source and the byte offset where each preset line starts.
    fn assemble(&self) -> (String, Vec<(usize, usize)>) {
        let mut source = String::new();
        let mut starts = Vec::new();
        for (line, text) in self.lines.values().flatten() {
            starts.push((source.len(), *line));
            source.push_str(text);
            source.push('\n');
        }
        (source, starts)
    }

    fn line_at(starts: &[(usize, usize)], offset: usize) -> usize {
        starts
            .iter()
            .rev()
            .find(|(start, _)| *start <= offset)
            .or(starts.first())
            .map(|(_, line)| *line)
            .unwrap_or(0)
    }

    fn compile(&self, symbols: &mut SymbolTable) -> Result<Program, ParseError> {
        if self.is_empty() {
            return Ok(Program::default());
        }

        let (source, starts) = self.assemble();
        let statements = expr::parse_program(&source).map_err(|e| ParseError {
            line: Self::line_at(&starts, e.offset),
            message: e.message,
        })?;
        expr::compile(&statements, symbols).map_err(|e| ParseError {
            line: Self::line_at(&starts, e.offset),
            message: e.message,
        })
    }
}

/// `prefix` followed by only digits.
fn suffix_index(key: &str, prefix: &str) -> Option<u32> {
    let rest = key.strip_prefix(prefix)?;
    if rest.is_empty() || !rest.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    rest.parse().ok()
}

fn parse_number(key: &str, value: &str, line: usize) -> Result<f64, ParseError> {
    value.parse::<f64>().map_err(|_| ParseError {
        line,
        message: format!("expected a number for `{}`, got `{}`", key, value),
    })
}

/// Parse preset text. `id` is recorded as the preset's identity and
/// `base_dir` resolves relative texture paths.
pub fn parse_preset(source: &str, id: &str, base_dir: Option<&Path>) -> Result<Preset, PresetError> {
    let mut name: Option<String> = None;
    let mut numeric: Vec<(String, f64, usize)> = Vec::new();
    let mut per_frame_init = CodeBlock::default();
    let mut per_frame = CodeBlock::default();
    let mut per_pixel = CodeBlock::default();
    let mut shader_lines: BTreeMap<u32, Vec<String>> = BTreeMap::new();
    let mut requirements: Vec<ResourceRequirement> = Vec::new();
    let mut waves: BTreeMap<u32, (bool, CustomWave)> = BTreeMap::new();

    for (i, raw) in source.lines().enumerate() {
        let line = i + 1;
        let trimmed = raw.trim();
        if trimmed.is_empty()
            || trimmed.starts_with("//")
            || trimmed.starts_with('#')
            || (trimmed.starts_with('[') && trimmed.ends_with(']'))
        {
            continue;
        }

        let (key, value) = trimmed.split_once('=').ok_or_else(|| ParseError {
            line,
            message: format!("expected `key=value`, got `{}`", trimmed),
        })?;
        let key = key.trim();
        let value = value.trim();

        if key.is_empty() {
            return Err(ParseError {
                line,
                message: "empty key".to_string(),
            }
            .into());
        }

        if key == "name" {
            name = Some(value.to_string());
        } else if let Some(n) = suffix_index(key, "per_frame_init_") {
            per_frame_init.push(n, line, value);
        } else if let Some(n) = suffix_index(key, "per_frame_") {
            per_frame.push(n, line, value);
        } else if let Some(n) = suffix_index(key, "per_pixel_") {
            per_pixel.push(n, line, value);
        } else if let Some(n) = suffix_index(key, "shader_") {
            // Raw text after the first `=`, indentation included.
            let body = raw.split_once('=').map(|(_, v)| v).unwrap_or_default();
            shader_lines.entry(n).or_default().push(body.to_string());
        } else if suffix_index(key, "texture_").is_some() {
            let path = Path::new(value);
            let resolved = match base_dir {
                Some(dir) if path.is_relative() => dir.join(path),
                _ => path.to_path_buf(),
            };
            requirements.push(ResourceRequirement::Texture(resolved));
        } else if suffix_index(key, "warp_").is_some() || suffix_index(key, "comp_").is_some() {
            let prefix = key.trim_end_matches(|c: char| c.is_ascii_digit());
            let prefix = prefix.trim_end_matches('_').to_string();
            if !requirements.contains(&ResourceRequirement::HlslShader(prefix.clone())) {
                requirements.push(ResourceRequirement::HlslShader(prefix));
            }
        } else if let Some(rest) = key.strip_prefix("wavecode_") {
            let (n, param) = rest.split_once('_').ok_or_else(|| ParseError {
                line,
                message: format!("malformed wavecode key `{}`", key),
            })?;
            let index: u32 = n.parse().map_err(|_| ParseError {
                line,
                message: format!("malformed wavecode key `{}`", key),
            })?;
            let v = parse_number(key, value, line)?;
            let (enabled, wave) = waves
                .entry(index)
                .or_insert_with(|| (false, CustomWave::new(index)));
            match param {
                "enabled" => *enabled = v != 0.0,
                "r" => wave.r = v as f32,
                "g" => wave.g = v as f32,
                "b" => wave.b = v as f32,
                "a" => wave.a = v as f32,
                "scaling" => wave.scaling = v as f32,
                "y" => wave.y = v as f32,
                "bSpectrum" => wave.spectrum = v != 0.0,
                _ => {}
            }
        } else if let Some(rest) = key.strip_prefix("shapecode_") {
            if let Some((n, "enabled")) = rest.split_once('_') {
                let index: u32 = n.parse().map_err(|_| ParseError {
                    line,
                    message: format!("malformed shapecode key `{}`", key),
                })?;
                if parse_number(key, value, line)? != 0.0 {
                    requirements.push(ResourceRequirement::CustomShape(index));
                }
            }
        } else if IGNORED_KEYS.contains(&key) {
            continue;
        } else {
            let v = parse_number(key, value, line)?;
            numeric.push((canonical_name(key).to_string(), v, line));
        }
    }

    let mut symbols = SymbolTable::with_builtins();
    for (key, _, line) in &numeric {
        if let Some(slot) = symbols.slot(key) {
            if SymbolTable::is_read_only(slot) {
                return Err(ParseError {
                    line: *line,
                    message: format!("`{}` is a read-only input and cannot be set", key),
                }
                .into());
            }
        }
        symbols.intern(key);
    }

    let per_frame_init = per_frame_init.compile(&mut symbols)?;
    let per_frame = per_frame.compile(&mut symbols)?;
    let per_pixel = per_pixel.compile(&mut symbols)?;

    let mut base_values = symbols.default_values();
    for (key, v, _) in &numeric {
        if let Some(slot) = symbols.slot(key) {
            base_values[slot] = *v;
        }
    }

    let shader = if shader_lines.is_empty() {
        None
    } else {
        requirements.push(ResourceRequirement::WgslShader);
        Some(shader_lines.into_values().flatten().collect::<Vec<_>>().join("\n"))
    };

    let custom_waves: Vec<CustomWave> = waves
        .into_values()
        .filter(|(enabled, _)| *enabled)
        .map(|(_, wave)| wave)
        .collect();
    for wave in &custom_waves {
        requirements.push(ResourceRequirement::CustomWaveform(wave.index));
    }

    let name = name.unwrap_or_else(|| match id.strip_prefix("inline:") {
        Some(inline) => inline.to_string(),
        None => Path::new(id)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("inline")
            .to_string(),
    });

    Ok(Preset {
        id: id.to_string(),
        name,
        symbols,
        base_values,
        per_frame_init,
        per_frame,
        per_pixel,
        shader,
        requirements,
        custom_waves,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preset::vars::{DECAY, WAVE_MODE, ZOOM};
    use crate::preset::ResourceKind;

    const SPIRAL: &str = "\
[preset00]
name=Spiral
fDecay=0.9
nWaveMode=1
zoom=1.01
per_frame_init_1=phase = 0;
per_frame_1=phase = phase + 0.1;
per_frame_2=rot = 0.05 * sin(phase) + 0.02 * bass;
per_pixel_1=zoom = zoom + 0.02 * rad;
";

    fn parse(source: &str) -> Result<Preset, PresetError> {
        parse_preset(source, "inline:test", None)
    }

    #[test]
    fn test_parses_base_values_and_code() {
        let preset = parse(SPIRAL).unwrap();
        assert_eq!(preset.name(), "Spiral");
        assert_eq!(preset.base_values()[DECAY], 0.9);
        assert_eq!(preset.base_values()[WAVE_MODE], 1.0);
        assert_eq!(preset.base_values()[ZOOM], 1.01);
        assert_eq!(preset.per_frame_init().len(), 1);
        assert_eq!(preset.per_frame().len(), 2);
        assert_eq!(preset.per_pixel().len(), 1);
        assert!(preset.symbols().slot("phase").is_some());
        assert!(preset.requirements().is_empty());
    }

    #[test]
    fn test_code_lines_join_in_suffix_order() {
        let preset = parse("per_frame_2=b = a * 2;\nper_frame_1=a = 3;").unwrap();
        let mut vars = preset.base_values().to_vec();
        preset.per_frame().run(&mut vars);
        assert_eq!(vars[preset.symbols().slot("b").unwrap()], 6.0);
    }

    #[test]
    fn test_syntax_error_reports_line() {
        let source = "name=Broken\nper_frame_1=zoom = 1;\nper_frame_2=rot = (1 + ;\n";
        match parse(source) {
            Err(PresetError::Parse(e)) => assert_eq!(e.line, 3, "{}", e),
            other => panic!("expected parse error, got {:?}", other.map(|p| p.id)),
        }
    }

    #[test]
    fn test_missing_equals_is_parse_error() {
        match parse("name=x\nthis line has no separator") {
            Err(PresetError::Parse(e)) => assert_eq!(e.line, 2),
            other => panic!("expected parse error, got {:?}", other.map(|p| p.id)),
        }
    }

    #[test]
    fn test_read_only_assignment_is_parse_error() {
        let err = parse("per_frame_1=bass = 2;").unwrap_err();
        assert!(err.to_string().contains("read-only"), "{}", err);

        match parse("name=x\ntime=3") {
            Err(PresetError::Parse(e)) => assert_eq!(e.line, 2),
            other => panic!("expected parse error, got {:?}", other.map(|p| p.id)),
        }
    }

    #[test]
    fn test_non_numeric_value_is_parse_error() {
        assert!(matches!(parse("zoom=fast"), Err(PresetError::Parse(_))));
    }

    #[test]
    fn test_requirements_are_collected() {
        let source = "\
texture_0=noise.png
wavecode_0_enabled=1
wavecode_0_r=0.5
wavecode_1_enabled=0
shapecode_0_enabled=1
warp_1=`shader_body
shader_1=  return color * 0.5;
";
        let preset = parse_preset(source, "/presets/x.milk", Some(Path::new("/presets"))).unwrap();
        let kinds: Vec<ResourceKind> = preset.requirements().iter().map(|r| r.kind()).collect();
        assert!(kinds.contains(&ResourceKind::Texture));
        assert!(kinds.contains(&ResourceKind::CustomWaveform));
        assert!(kinds.contains(&ResourceKind::CustomShape));
        assert!(kinds.contains(&ResourceKind::HlslShader));
        assert!(kinds.contains(&ResourceKind::WgslShader));

        assert_eq!(
            preset.textures().next().unwrap(),
            &Path::new("/presets").join("noise.png")
        );
        assert_eq!(preset.custom_waves().len(), 1);
        assert_eq!(preset.custom_waves()[0].r, 0.5);
        assert_eq!(preset.shader(), Some("  return color * 0.5;"));
        assert_eq!(preset.name(), "x");
    }
}
