//! Shared fixtures for unit tests.

use crate::graph::{Pipeline, Position};
use pipeforge_core::{BlockId, PortRef};
use pipeforge_toolbox::{Format, FormatRegistry, ModuleDef, Parameter, Toolbox};
use std::sync::Arc;

/// Formats `text`, `csv` (extends text), `image`; modules `convert`,
/// `merge`, `label` and `split`.
pub(crate) fn toolbox() -> Arc<Toolbox> {
    let formats = FormatRegistry::load([
        Format::new("text", "txt"),
        Format::new("csv", "csv").with_parent("text"),
        Format::new("image", "png"),
    ])
    .unwrap();
    let mut toolbox = Toolbox::new("test", formats);
    let defs = [
        ModuleDef::new(
            "convert",
            vec![Parameter::required("in", "text")],
            vec![Parameter::required("out", "csv")],
            "convert {in} {out}",
        ),
        ModuleDef::new(
            "merge",
            vec![
                Parameter::required("a", "text"),
                Parameter::required("b", "text"),
            ],
            vec![Parameter::required("out", "csv")],
            "merge {a} {b} > {out}",
        ),
        ModuleDef::new(
            "label",
            vec![
                Parameter::required("in", "text"),
                Parameter::optional("title", "arg"),
            ],
            vec![Parameter::required("out", "text")],
            "label {title} {in} {out}",
        ),
        ModuleDef::new(
            "split",
            vec![Parameter::required("in", "csv")],
            vec![
                Parameter::required("left", "csv"),
                Parameter::required("right", "csv"),
            ],
            "split {in} {left} {right}",
        ),
    ];
    for def in defs {
        toolbox.register_module(def.unwrap()).unwrap();
    }
    Arc::new(toolbox)
}

/// `infile` source -> `convert` -> `outfile` sink, returned with the three ids
pub(crate) fn linear() -> (Pipeline, BlockId, BlockId, BlockId) {
    let mut p = Pipeline::new("linear", toolbox());
    let src = p
        .add_source(
            "infile",
            Parameter::required("in", "text"),
            Position::new(10.0, 20.0),
        )
        .unwrap();
    let m = p.add_module("convert", Position::new(100.0, 20.0)).unwrap();
    let sink = p
        .add_sink(
            "outfile",
            Parameter::required("out", "csv"),
            Position::new(200.0, 20.0),
        )
        .unwrap();
    p.connect(PortRef::output(src, 0), PortRef::input(m, 0))
        .unwrap();
    p.connect(PortRef::output(m, 0), PortRef::input(sink, 0))
        .unwrap();
    (p, src, m, sink)
}
