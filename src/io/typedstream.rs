//! Reader for CMTK's "typedstream" text format.
//!
//! A file starts with a `! TYPEDSTREAM <version>` line,
//! followed by nested sections (`name {` ... `}`)
//! containing fields (`name value value ...`).
//! Long numeric fields may continue over several lines.
use crate::{AffineParams, SplineWarp, Xform};

pub(crate) const HEADER: &str = "! TYPEDSTREAM";

pub(crate) fn is_typedstream(text: &str) -> bool {
    text.trim_start().starts_with(HEADER)
}

#[derive(Debug, Default)]
pub(crate) struct Section {
    name: String,
    fields: Vec<(String, Vec<String>)>,
    children: Vec<Section>,
}

impl Section {
    fn child(&self, name: &str) -> Option<&Section> {
        self.children.iter().find(|c| c.name == name)
    }

    fn field(&self, name: &str) -> Option<&[String]> {
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_slice())
    }

    fn floats(&self, name: &str) -> Result<Option<Vec<f64>>, String> {
        let Some(values) = self.field(name) else {
            return Ok(None);
        };
        values
            .iter()
            .map(|v| {
                v.parse::<f64>()
                    .map_err(|_| format!("non-numeric value `{v}` in field `{name}`"))
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Some)
    }

    fn triple(&self, name: &str, default: [f64; 3]) -> Result<[f64; 3], String> {
        match self.floats(name)? {
            None => Ok(default),
            Some(v) => v.as_slice().try_into().map_err(|_| {
                format!("field `{name}` needs 3 values, got {}", v.len())
            }),
        }
    }
}

/// Parse the section tree; the returned root holds top-level fields and sections.
pub(crate) fn parse(text: &str) -> Result<Section, String> {
    let mut lines = text.lines().map(str::trim).filter(|l| !l.is_empty());

    let header = lines.next().unwrap_or_default();
    let Some(version) = header.strip_prefix(HEADER) else {
        return Err(format!("missing `{HEADER}` header"));
    };
    if !version.trim().starts_with('2') {
        log::warn!("unexpected typedstream version `{}`", version.trim());
    }

    let mut stack = vec![Section::default()];
    for line in lines {
        if line == "}" {
            if stack.len() < 2 {
                return Err("unbalanced `}`".into());
            }
            // checked above
            let finished = stack.pop().unwrap_or_default();
            if let Some(parent) = stack.last_mut() {
                parent.children.push(finished);
            }
            continue;
        }
        if let Some(name) = line.strip_suffix('{') {
            stack.push(Section {
                name: name.trim().to_string(),
                ..Default::default()
            });
            continue;
        }

        let Some(current) = stack.last_mut() else {
            return Err("unbalanced `}`".into());
        };
        let mut tokens = line.split_whitespace().map(str::to_string);
        let Some(first) = tokens.next() else {
            continue;
        };
        if is_continuation(&first) {
            let Some((_, values)) = current.fields.last_mut() else {
                return Err(format!("value `{first}` outside of any field"));
            };
            values.push(first);
            values.extend(tokens);
        } else {
            current.fields.push((first, tokens.collect()));
        }
    }

    if stack.len() != 1 {
        return Err(format!("unterminated section `{}`", stack[stack.len() - 1].name));
    }
    Ok(stack.pop().unwrap_or_default())
}

fn is_continuation(token: &str) -> bool {
    token
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_digit() || matches!(c, '-' | '+' | '.'))
}

/// Parse a registration file into a single transformation.
pub(crate) fn parse_xform(text: &str) -> Result<Xform, String> {
    let root = parse(text)?;
    let reg = root.child("registration").unwrap_or(&root);
    if let Some(warp) = reg.child("spline_warp") {
        return parse_warp(warp).map(Xform::Warp);
    }
    if let Some(affine) = reg.child("affine_xform") {
        return parse_affine(affine).map(|p| Xform::Affine(p.to_affine()));
    }
    Err("no `spline_warp` or `affine_xform` section".into())
}

fn parse_affine(section: &Section) -> Result<AffineParams, String> {
    let default = AffineParams::default();
    Ok(AffineParams {
        translation: section.triple("xlate", default.translation)?,
        rotation: section.triple("rotate", default.rotation)?,
        scale: section.triple("scale", default.scale)?,
        shear: section.triple("shear", default.shear)?,
        center: section.triple("center", default.center)?,
    })
}

fn parse_warp(section: &Section) -> Result<SplineWarp, String> {
    let dims_f = section.triple("dims", [f64::NAN; 3])?;
    if dims_f.iter().any(|d| !d.is_finite() || d.fract() != 0.0 || *d < 0.0) {
        return Err(format!("`dims` must be 3 non-negative integers, got {dims_f:?}"));
    }
    let dims = dims_f.map(|d| d as usize);
    let domain = section.triple("domain", [f64::NAN; 3])?;
    if domain.iter().any(|d| d.is_nan()) {
        return Err("missing `domain` field".into());
    }
    let origin = section.triple("origin", [0.0; 3])?;
    let absolute = match section.field("absolute").and_then(|v| v.first()) {
        None => true,
        Some(v) => match v.as_str() {
            "yes" | "1" => true,
            "no" | "0" => false,
            other => return Err(format!("`absolute` must be yes or no, got `{other}`")),
        },
    };
    let coefficients = section
        .floats("coefficients")?
        .ok_or_else(|| "missing `coefficients` field".to_string())?;
    let initial = section
        .child("affine_xform")
        .map(|s| parse_affine(s).map(|p| p.to_affine()))
        .transpose()?;

    let warp = if absolute {
        SplineWarp::try_new(dims, domain, origin, coefficients, initial)
    } else {
        SplineWarp::from_displacements(dims, domain, origin, coefficients, initial)
    };
    warp.map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use approx::assert_ulps_eq;

    use super::*;
    use crate::{
        Transformation,
        tests::{AFFINE_TYPEDSTREAM, ROTATED_TYPEDSTREAM, identity_warp_typedstream},
    };

    #[test]
    fn test_parse_sections() {
        let root = parse(AFFINE_TYPEDSTREAM).unwrap();
        let reg = root.child("registration").unwrap();
        assert_eq!(reg.field("reference_study").unwrap(), ["\"ref.nrrd\""]);
        let aff = reg.child("affine_xform").unwrap();
        assert_eq!(aff.triple("xlate", [0.0; 3]).unwrap(), [10.0, -5.0, 2.0]);
    }

    #[test]
    fn test_parse_affine() {
        let Xform::Affine(affine) = parse_xform(AFFINE_TYPEDSTREAM).unwrap() else {
            panic!("expected affine");
        };
        let mut out = [f64::NAN; 3];
        affine.transform_into(&[0.0; 3], &mut out);
        assert_ulps_eq!(out.as_slice(), [10.0, -5.0, 2.0].as_slice(), epsilon = 1e-12);
    }

    #[test]
    fn test_parse_warp_with_continuations() {
        let text = identity_warp_typedstream(false);
        let Xform::Warp(warp) = parse_xform(&text).unwrap() else {
            panic!("expected warp");
        };
        assert_eq!(warp.dims(), [4, 4, 4]);
        assert!(warp.initial_affine().is_some());
        let mut out = [f64::NAN; 3];
        assert!(warp.transform_into(&[3.0, 4.0, 5.0], &mut out));
        assert_ulps_eq!(out.as_slice(), [3.0, 4.0, 5.0].as_slice(), epsilon = 1e-10);
    }

    #[test]
    fn test_parse_relative_warp() {
        let text = identity_warp_typedstream(true);
        let Xform::Warp(warp) = parse_xform(&text).unwrap() else {
            panic!("expected warp");
        };
        let mut out = [f64::NAN; 3];
        assert!(warp.transform_into(&[1.0, 2.0, 3.0], &mut out));
        assert_ulps_eq!(out.as_slice(), [1.0, 2.0, 3.0].as_slice(), epsilon = 1e-10);
    }

    #[test]
    fn test_errors() {
        assert!(parse("registration {\n}\n").is_err());
        assert!(parse("! TYPEDSTREAM 2.4\nregistration {\n").is_err());
        assert!(parse("! TYPEDSTREAM 2.4\n}\n").is_err());
        assert!(parse_xform("! TYPEDSTREAM 2.4\nregistration {\n}\n").is_err());
        assert!(
            parse_xform("! TYPEDSTREAM 2.4\naffine_xform {\nxlate 1 2\n}\n")
                .unwrap_err()
                .contains("xlate")
        );
        let short_warp =
            "! TYPEDSTREAM 2.4\nspline_warp {\ndims 4 4 4\ndomain 1 1 1\ncoefficients 0 0 0\n}\n";
        assert!(parse_xform(short_warp).is_err());
    }

    #[test]
    fn test_huge_dims() {
        let text = "! TYPEDSTREAM 2.4
spline_warp {
dims 10000000 10000000 10000000
domain 1 1 1
coefficients 0 0 0
}
";
        assert!(parse_xform(text).unwrap_err().contains("too many"));
    }

    #[test]
    fn test_parse_rotated_affine() {
        let Xform::Affine(aff) = parse_xform(ROTATED_TYPEDSTREAM).unwrap() else {
            panic!("expected affine");
        };
        let mut out = [f64::NAN; 3];
        assert!(aff.transform_into(&[1.0, 0.0, 0.0], &mut out));
        assert_ulps_eq!(out.as_slice(), [0.0, -1.0, 0.0].as_slice(), epsilon = 1e-12);
        assert!(aff.transform_into(&[0.0, 1.0, 0.0], &mut out));
        assert_ulps_eq!(out.as_slice(), [1.0, 0.0, 0.0].as_slice(), epsilon = 1e-12);
    }
}
