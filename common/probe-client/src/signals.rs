//! Default "interesting" signals per Qt widget class

/// Signals tried when a class is not in [`INTERACTIVE_SIGNALS`]
pub const FALLBACK_SIGNALS: &[&str] = &["clicked", "toggled", "triggered"];

/// Known widget classes and their most interaction-relevant signals
///
/// Order matters: the suffix fallback in [`signals_for_class`] returns the
/// first entry that matches.
pub const INTERACTIVE_SIGNALS: &[(&str, &[&str])] = &[
    ("QPushButton", &["clicked", "toggled"]),
    ("QToolButton", &["clicked", "toggled", "triggered"]),
    ("QAction", &["triggered", "toggled"]),
    ("QLineEdit", &["textChanged", "textEdited"]),
    ("QTextEdit", &["textChanged"]),
    ("QPlainTextEdit", &["textChanged"]),
    ("QCheckBox", &["stateChanged", "toggled"]),
    ("QRadioButton", &["toggled"]),
    ("QComboBox", &["currentIndexChanged", "currentTextChanged"]),
    ("QSlider", &["valueChanged"]),
    ("QSpinBox", &["valueChanged"]),
    ("QDoubleSpinBox", &["valueChanged"]),
    ("QDial", &["valueChanged"]),
    ("QTabWidget", &["currentChanged"]),
    ("QTabBar", &["currentChanged"]),
    ("QListView", &["clicked", "doubleClicked", "activated"]),
    (
        "QTreeView",
        &["clicked", "doubleClicked", "activated", "expanded", "collapsed"],
    ),
    ("QTableView", &["clicked", "doubleClicked", "activated"]),
    (
        "QListWidget",
        &["currentItemChanged", "itemClicked", "itemDoubleClicked"],
    ),
    (
        "QTreeWidget",
        &["currentItemChanged", "itemClicked", "itemDoubleClicked"],
    ),
    (
        "QTableWidget",
        &["currentCellChanged", "cellClicked", "cellDoubleClicked"],
    ),
    ("QMenu", &["triggered"]),
    ("QMenuBar", &["triggered"]),
];

/// Resolve default signals for a class name
///
/// Exact match first, then a suffix match in either direction so that
/// subclasses such as `MyPushButton` map onto `QPushButton`. An empty class
/// name gets the fallback list.
pub fn signals_for_class(class_name: &str) -> &'static [&'static str] {
    if class_name.is_empty() {
        return FALLBACK_SIGNALS;
    }

    if let Some((_, signals)) = INTERACTIVE_SIGNALS
        .iter()
        .find(|(known, _)| *known == class_name)
    {
        return signals;
    }

    INTERACTIVE_SIGNALS
        .iter()
        .find(|(known, _)| class_name.ends_with(known) || known.ends_with(class_name))
        .map_or(FALLBACK_SIGNALS, |(_, signals)| *signals)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_match() {
        assert_eq!(signals_for_class("QPushButton"), &["clicked", "toggled"]);
        assert_eq!(signals_for_class("QMenuBar"), &["triggered"]);
    }

    #[test]
    fn test_subclass_suffix_match() {
        assert_eq!(
            signals_for_class("CalculatorPushButton"),
            &["clicked", "toggled"]
        );
        // Exact match wins over the earlier suffix candidate QSpinBox
        assert_eq!(signals_for_class("QDoubleSpinBox"), &["valueChanged"]);
    }

    #[test]
    fn test_unknown_and_empty_use_fallback() {
        assert_eq!(signals_for_class("QLabel"), FALLBACK_SIGNALS);
        assert_eq!(signals_for_class(""), FALLBACK_SIGNALS);
    }
}
