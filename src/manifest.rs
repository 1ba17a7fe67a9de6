// manifest.rs — TOML manifest → StagingModel.
//
// A manifest describes the pipeline declaratively:
//
//   HCInputArgs = ["input"]              # optional: names for the host inputs
//
//   [[stages]]
//   name = "blur"                        # kernel entry point
//   args = ["input", "blurred"]          # bound to parameters in order
//   range = { mode = "ADD_SUB", params = [0, 0, 0], ref_arg = "blurred" }
//
//   [args.blurred]
//   channel_type  = "FLOAT"
//   channel_count = 1
//   type          = "IMAGE2D"
//   size          = { mode = "ADD_SUB", params = [0, 0, 0], ref_arg = "input" }
//   is_host_readable = false
//
// Arguments are created the first time a stage mentions them, so `ref_arg`
// can only name arguments mentioned earlier (or host inputs). An empty string
// in a stage's `args` rebinds the most recently introduced argument, and an
// empty `ref_arg` behaves as if it were absent.
//
// Defaults:
//   size   ADD_SUB [0,0,0] relative to the most recently introduced argument
//   range  ADD_SUB [0,0,0] relative to the stage's last argument
//
// Every string kept by the model is copied out of the document; the parsed
// `toml::Table` is dropped before `parse` returns.

use std::path::Path;

use toml::{Table, Value};
use tracing::{debug, info, warn};

use crate::error::{PipelineError, Result, Warning};
use crate::format::{ArgKind, ChannelFormat, ChannelType};
use crate::size::{Mode, RangeSpec};
use crate::staging::{HostInput, StagingModel};

/// A parsed manifest: the staging model plus any warnings raised while
/// reading it.
#[derive(Debug, Clone)]
pub struct Manifest {
    pub model: StagingModel,
    pub warnings: Vec<Warning>,
}

impl Manifest {
    /// Read and parse the manifest at `path`.
    ///
    /// `inputs` are registered as the first arguments, in order; their
    /// data is not touched here.
    pub fn load(path: impl AsRef<Path>, inputs: &[HostInput]) -> Result<Manifest> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| PipelineError::file(path, e))?;
        Self::parse_document(&text, &path.display().to_string(), inputs)
    }

    /// Parse manifest text.
    pub fn parse(text: &str, inputs: &[HostInput]) -> Result<Manifest> {
        Self::parse_document(text, "manifest", inputs)
    }

    fn parse_document(text: &str, origin: &str, inputs: &[HostInput]) -> Result<Manifest> {
        let doc: Table = text.parse().map_err(|e: toml::de::Error| {
            PipelineError::DocumentParseFailed {
                origin: origin.to_owned(),
                message: e.message().to_owned(),
            }
        })?;

        let stages = stages_array(&doc)?;
        let args = args_table(&doc)?;

        let mut reader = Reader { args, model: StagingModel::new(), warnings: Vec::new() };
        reader.register_inputs(doc.get("HCInputArgs"), inputs)?;
        for (i, stage) in stages.iter().enumerate() {
            reader.stage(i, stage)?;
        }

        let Reader { model, warnings, .. } = reader;
        info!(
            origin,
            stages = model.stages().len(),
            arguments = model.arguments().len(),
            kernels = model.kernel_names().len(),
            "manifest loaded"
        );
        Ok(Manifest { model, warnings })
    }
}

fn stages_array(doc: &Table) -> Result<Vec<&Table>> {
    let invalid = |detail: &str| PipelineError::InvalidStagesArray { detail: detail.to_owned() };
    let array = match doc.get("stages") {
        None => return Err(invalid("missing")),
        Some(v) => v.as_array().ok_or_else(|| invalid("not an array"))?,
    };
    if array.is_empty() {
        return Err(invalid("empty"));
    }
    array
        .iter()
        .map(|v| v.as_table().ok_or_else(|| invalid("entries must be tables")))
        .collect()
}

fn args_table(doc: &Table) -> Result<&Table> {
    let invalid = |detail: &str| PipelineError::InvalidArgsTable { detail: detail.to_owned() };
    let table = match doc.get("args") {
        None => return Err(invalid("missing")),
        Some(v) => v.as_table().ok_or_else(|| invalid("not a table"))?,
    };
    if table.is_empty() {
        return Err(invalid("empty"));
    }
    Ok(table)
}

/// Walks the stages once, growing the model left to right.
struct Reader<'a> {
    args: &'a Table,
    model: StagingModel,
    warnings: Vec<Warning>,
}

impl Reader<'_> {
    fn register_inputs(&mut self, names: Option<&Value>, inputs: &[HostInput]) -> Result<()> {
        let renamed: Option<Vec<&str>> = match names {
            None => None,
            Some(value) => {
                let invalid = || PipelineError::InvalidHardcodedArgsArray { expected: inputs.len() };
                let array = value.as_array().ok_or_else(invalid)?;
                if array.len() != inputs.len() {
                    return Err(invalid());
                }
                Some(array.iter().map(|v| v.as_str().ok_or_else(invalid)).collect::<Result<Vec<_>>>()?)
            }
        };

        for (i, input) in inputs.iter().enumerate() {
            let name = renamed.as_ref().map_or(input.name.as_str(), |n| n[i]);
            self.model.add_input(name, input.kind, input.format)?;
        }
        Ok(())
    }

    fn last_introduced(&self) -> Option<usize> {
        self.model.arguments().len().checked_sub(1)
    }

    fn stage(&mut self, stage: usize, table: &Table) -> Result<()> {
        let name = table
            .get("name")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .ok_or(PipelineError::MissingStageName { stage })?;

        let invalid_args = |detail: &str| PipelineError::InvalidStageArgsArray {
            stage,
            detail: detail.to_owned(),
        };
        let entries = table
            .get("args")
            .and_then(Value::as_array)
            .filter(|a| !a.is_empty())
            .ok_or_else(|| invalid_args("missing or empty"))?;

        let mut refs = Vec::with_capacity(entries.len());
        for entry in entries {
            let arg = entry.as_str().ok_or_else(|| invalid_args("entries must be strings"))?;
            let index = if arg.is_empty() {
                self.last_introduced()
                    .ok_or_else(|| invalid_args("empty name with no previous argument"))?
            } else if let Some(index) = self.model.arg_index(arg) {
                index
            } else {
                self.declare(stage, arg)?
            };
            refs.push(index);
        }

        let owner = format!("stage {stage} ({name})");
        let range = self.range_spec(table.get("range"), refs.last().copied(), &owner)?;
        self.model.add_stage(name, refs, range)?;
        Ok(())
    }

    /// Create the argument `name` from its `args` entry.
    fn declare(&mut self, stage: usize, name: &str) -> Result<usize> {
        let args = self.args;
        let entry = args
            .get(name)
            .and_then(Value::as_table)
            .ok_or_else(|| PipelineError::MissingArgEntry { stage, name: name.to_owned() })?;

        let raw_type = entry.get("channel_type");
        let channel_type = raw_type
            .and_then(Value::as_str)
            .and_then(ChannelType::from_name)
            .ok_or_else(|| PipelineError::InvalidChannelType {
                arg: name.to_owned(),
                value: describe(raw_type),
            })?;

        let channels = match entry.get("channel_count") {
            None => channel_type.clamp_channels(1),
            Some(Value::Integer(requested)) => {
                let used = channel_type.clamp_channels(*requested);
                if i64::from(used) != *requested {
                    let w = Warning::ChannelCountClamped {
                        arg: name.to_owned(),
                        requested: *requested,
                        used,
                    };
                    warn!("{w}");
                    self.warnings.push(w);
                }
                used
            }
            Some(other) => {
                return Err(PipelineError::InvalidChannelType {
                    arg: name.to_owned(),
                    value: format!("channel_count = {other}"),
                })
            }
        };

        let raw_kind = entry.get("type");
        let kind = raw_kind
            .and_then(Value::as_str)
            .and_then(ArgKind::from_name)
            .ok_or_else(|| PipelineError::InvalidArgType {
                arg: name.to_owned(),
                value: describe(raw_kind),
            })?;

        // Sized before it is registered: an argument can never refer to itself.
        let owner = format!("argument {name:?}");
        let size = self.range_spec(entry.get("size"), self.last_introduced(), &owner)?;
        let host_readable = match entry.get("is_host_readable") {
            None => false,
            Some(Value::Boolean(b)) => *b,
            Some(other) => {
                return Err(PipelineError::InvalidArgType {
                    arg: name.to_owned(),
                    value: format!("is_host_readable = {other}"),
                })
            }
        };

        let format = ChannelFormat { channel_type, channels };
        let index = self.model.add_argument(name, kind, format, size, host_readable)?;
        debug!(stage, arg = name, index, "argument introduced");
        Ok(index)
    }

    /// Read a `size`/`range` table. `default_ref` is used when `ref_arg` is
    /// absent (and for the whole spec when the table itself is absent).
    fn range_spec(&self, value: Option<&Value>, default_ref: Option<usize>, owner: &str) -> Result<RangeSpec> {
        let invalid = |detail: String| PipelineError::InvalidRangeMode { owner: owner.to_owned(), detail };
        let not_staged = |reference: &str| PipelineError::RefArgNotYetStaged {
            owner: owner.to_owned(),
            reference: reference.to_owned(),
        };

        let Some(value) = value else {
            let r = default_ref.ok_or_else(|| not_staged("<previous argument>"))?;
            return Ok(RangeSpec::same_as(ref_u16(r).map_err(invalid)?));
        };
        let table = value.as_table().ok_or_else(|| invalid("expected a table".into()))?;

        let mode = match table.get("mode") {
            None => Mode::AddSub,
            Some(Value::String(s)) => {
                Mode::from_name(s).ok_or_else(|| invalid(format!("unknown mode {s:?}")))?
            }
            Some(other) => return Err(invalid(format!("mode must be a string, found {other}"))),
        };

        let mut params = [0i32; 3];
        match table.get("params") {
            None => {}
            Some(Value::Array(values)) if values.len() <= 3 => {
                for (slot, v) in params.iter_mut().zip(values) {
                    *slot = v
                        .as_integer()
                        .and_then(|n| i32::try_from(n).ok())
                        .ok_or_else(|| invalid(format!("param {v} is not a 32-bit integer")))?;
                }
            }
            Some(other) => return Err(invalid(format!("params must be up to 3 integers, found {other}"))),
        }

        // An empty `ref_arg` means the same as leaving it out.
        let ref_index = match table.get("ref_arg") {
            Some(Value::String(s)) if !s.is_empty() => self.model.arg_index(s).ok_or_else(|| not_staged(s))?,
            Some(Value::String(_)) | None => match default_ref {
                Some(r) => r,
                None if !mode.uses_reference() => 0,
                None => return Err(not_staged("<previous argument>")),
            },
            Some(other) => return Err(invalid(format!("ref_arg must be a string, found {other}"))),
        };

        Ok(RangeSpec::new(mode, params, ref_u16(ref_index).map_err(invalid)?))
    }
}

fn ref_u16(index: usize) -> std::result::Result<u16, String> {
    u16::try_from(index).map_err(|_| format!("reference index {index} exceeds {}", u16::MAX))
}

fn describe(value: Option<&Value>) -> String {
    match value {
        None => "<missing>".to_owned(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::size::Size3D;
    use crate::staging::ArgOrigin;

    fn host() -> Vec<HostInput> {
        vec![HostInput::new(
            "input",
            ArgKind::Image2D,
            ChannelFormat::new(ChannelType::UnormInt8, 1),
            Size3D::new(512, 384, 1),
            Vec::new(),
        )]
    }

    fn parse(text: &str) -> Result<Manifest> {
        Manifest::parse(text, &host())
    }

    const BLUR: &str = r#"
        [[stages]]
        name = "blur"
        args = ["input", "blurred"]

        [args.blurred]
        channel_type = "FLOAT"
        channel_count = 1
        type = "IMAGE2D"
    "#;

    #[test]
    fn test_minimal_manifest() {
        let m = parse(BLUR).unwrap().model;
        assert_eq!(m.arguments().len(), 2);
        assert_eq!(m.arguments()[0].origin, ArgOrigin::HostInput);
        let blurred = &m.arguments()[1];
        assert_eq!(blurred.origin, ArgOrigin::Derived);
        assert_eq!(blurred.format, ChannelFormat::new(ChannelType::Float, 1));
        // Default size: same as the previous argument.
        assert_eq!(blurred.size, RangeSpec::same_as(0));
        // Default range: same as the stage's last argument.
        assert_eq!(m.stages()[0].range, RangeSpec::same_as(1));
        assert_eq!(m.stages()[0].argument_refs, vec![0, 1]);
    }

    #[test]
    fn test_explicit_size_and_range() {
        let text = r#"
            [[stages]]
            name = "pad"
            args = ["input", "padded"]
            range = { mode = "EXACT", params = [8, 8, 1] }

            [args.padded]
            channel_type = "FLOAT"
            type = "IMAGE2D"
            size = { mode = "add_sub", params = [1, 1], ref_arg = "input" }
            is_host_readable = true
        "#;
        let m = parse(text).unwrap().model;
        let padded = &m.arguments()[1];
        assert_eq!(padded.size, RangeSpec::new(Mode::AddSub, [1, 1, 0], 0));
        assert!(padded.force_host_readable);
        assert_eq!(m.stages()[0].range.mode, Mode::Exact);
        assert_eq!(m.stages()[0].range.params, [8, 8, 1]);
    }

    #[test]
    fn test_zero_stages_rejected() {
        let err = parse("stages = []\n[args.a]\nchannel_type = \"FLOAT\"\ntype = \"BUFFER\"").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidStagesArray);
        let err = parse("[args.a]\nchannel_type = \"FLOAT\"\ntype = \"BUFFER\"").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidStagesArray);
    }

    #[test]
    fn test_empty_args_table_rejected() {
        let text = "args = {}\n[[stages]]\nname = \"k\"\nargs = [\"input\"]\n";
        let err = parse(text).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgsTable);
    }

    #[test]
    fn test_unknown_argument_named() {
        let text = BLUR.replace("\"input\", \"blurred\"", "\"input\", \"blurred\", \"edges\"");
        match parse(&text).unwrap_err() {
            PipelineError::MissingArgEntry { stage, name } => {
                assert_eq!(stage, 0);
                assert_eq!(name, "edges");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_forward_ref_rejected() {
        let text = r#"
            [[stages]]
            name = "a"
            args = ["input", "first"]
            [[stages]]
            name = "b"
            args = ["first", "second"]

            [args.first]
            channel_type = "FLOAT"
            type = "IMAGE2D"
            size = { ref_arg = "second" }

            [args.second]
            channel_type = "FLOAT"
            type = "IMAGE2D"
        "#;
        let err = parse(text).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RefArgNotYetStaged);
        assert!(err.to_string().contains("second"));
    }

    #[test]
    fn test_self_ref_rejected() {
        let text = BLUR.replace("type = \"IMAGE2D\"", "type = \"IMAGE2D\"\nsize = { ref_arg = \"blurred\" }");
        assert_eq!(parse(&text).unwrap_err().kind(), ErrorKind::RefArgNotYetStaged);
    }

    #[test]
    fn test_empty_string_reuses_last_argument() {
        let text = r#"
            [[stages]]
            name = "blur"
            args = ["input", "blurred"]
            [[stages]]
            name = "sharpen"
            args = ["", "input"]

            [args.blurred]
            channel_type = "FLOAT"
            type = "IMAGE2D"
        "#;
        let m = parse(text).unwrap().model;
        assert_eq!(m.stages()[1].argument_refs, vec![1, 0]);
    }

    #[test]
    fn test_empty_ref_arg_means_previous_argument() {
        let text = r#"
            [[stages]]
            name = "pad"
            args = ["input", "a", "b"]

            [args.a]
            channel_type = "FLOAT"
            type = "IMAGE2D"
            size = { params = [2, 2, 0] }

            [args.b]
            channel_type = "FLOAT"
            type = "IMAGE2D"
            size = { ref_arg = "", params = [1, 1, 0] }
        "#;
        let m = parse(text).unwrap().model;
        let b = &m.arguments()[2];
        assert_eq!(b.size.ref_index, 1);
        assert_eq!(b.size.params, [1, 1, 0]);
        let sizes = m.resolve_sizes(&host()).unwrap();
        assert_eq!(sizes[2], Size3D::new(515, 387, 1));
    }

    #[test]
    fn test_host_readable_must_be_boolean() {
        let text = BLUR.replace("type = \"IMAGE2D\"", "type = \"IMAGE2D\"\nis_host_readable = \"yes\"");
        let err = parse(&text).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgType);
        assert!(err.to_string().contains("is_host_readable"));
    }

    #[test]
    fn test_hardcoded_arg_names() {
        let renamed = format!("HCInputArgs = [\"camera\"]\n{}", BLUR.replace("\"input\"", "\"camera\""));
        let m = parse(&renamed).unwrap().model;
        assert_eq!(m.arguments()[0].name, "camera");

        let wrong = format!("HCInputArgs = [\"a\", \"b\"]\n{BLUR}");
        let err = parse(&wrong).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidHardcodedArgsArray { expected: 1 }));

        let not_strings = format!("HCInputArgs = [3]\n{BLUR}");
        assert_eq!(parse(&not_strings).unwrap_err().kind(), ErrorKind::InvalidHardcodedArgsArray);

        let empty = format!("HCInputArgs = [\"\"]\n{BLUR}");
        assert_eq!(parse(&empty).unwrap_err().kind(), ErrorKind::InvalidArgName);
    }

    #[test]
    fn test_invalid_channel_type_and_kind() {
        let text = BLUR.replace("\"FLOAT\"", "\"DOUBLE\"");
        match parse(&text).unwrap_err() {
            PipelineError::InvalidChannelType { arg, value } => {
                assert_eq!(arg, "blurred");
                assert_eq!(value, "DOUBLE");
            }
            other => panic!("unexpected error: {other}"),
        }
        let text = BLUR.replace("\"IMAGE2D\"", "\"TEXTURE\"");
        assert_eq!(parse(&text).unwrap_err().kind(), ErrorKind::InvalidArgType);
    }

    #[test]
    fn test_invalid_range_mode() {
        let text = BLUR.replace("type = \"IMAGE2D\"", "type = \"IMAGE2D\"\nsize = { mode = \"REL\" }");
        assert_eq!(parse(&text).unwrap_err().kind(), ErrorKind::InvalidRangeMode);
        let text = BLUR.replace("type = \"IMAGE2D\"", "type = \"IMAGE2D\"\nsize = { params = [1, 2, 3, 4] }");
        assert_eq!(parse(&text).unwrap_err().kind(), ErrorKind::InvalidRangeMode);
        let text = BLUR.replace("type = \"IMAGE2D\"", "type = \"IMAGE2D\"\nsize = \"big\"");
        assert_eq!(parse(&text).unwrap_err().kind(), ErrorKind::InvalidRangeMode);
    }

    #[test]
    fn test_channel_count_clamped_with_warning() {
        let text = BLUR.replace("channel_count = 1", "channel_count = 6");
        let manifest = parse(&text).unwrap();
        assert_eq!(manifest.model.arguments()[1].format.channels, 4);
        assert_eq!(
            manifest.warnings,
            vec![Warning::ChannelCountClamped { arg: "blurred".into(), requested: 6, used: 4 }]
        );
    }

    #[test]
    fn test_missing_stage_name() {
        let text = BLUR.replace("name = \"blur\"", "");
        assert!(matches!(parse(&text).unwrap_err(), PipelineError::MissingStageName { stage: 0 }));
    }

    #[test]
    fn test_document_parse_failure() {
        let err = parse("[[stages]\nname = ").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DocumentParseFailed);
    }

    #[test]
    fn test_load_missing_file() {
        let err = Manifest::load("/nonexistent/plugboard/MANIFEST.toml", &host()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FileNotFound);
    }
}
