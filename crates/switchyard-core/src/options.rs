//! Transform option sets and option matching.
//!
//! A transformer references named option sets from the `transformOptions`
//! catalogue. Each set is a list of option values and nested groups. When a
//! request arrives, the options a transformer could use are gathered from its
//! sets given the request's actual options, and the transformer is only a
//! candidate if every required option among them was supplied.

use crate::model::TransformOptions;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Named option sets, as found in a fragment's `transformOptions`.
pub type OptionCatalogue = IndexMap<String, Vec<TransformOption>>;

/// A single option or a group of options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TransformOption {
    Value(OptionValue),
    Group(OptionGroup),
}

impl TransformOption {
    /// An optional option value.
    pub fn optional(name: impl Into<String>) -> Self {
        TransformOption::Value(OptionValue {
            name: name.into(),
            required: false,
        })
    }

    /// A required option value.
    pub fn required(name: impl Into<String>) -> Self {
        TransformOption::Value(OptionValue {
            name: name.into(),
            required: true,
        })
    }

    /// A nested group.
    pub fn group(required: bool, options: Vec<TransformOption>) -> Self {
        TransformOption::Group(OptionGroup {
            required,
            transform_options: options,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionValue {
    pub name: String,
    #[serde(default)]
    pub required: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionGroup {
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub transform_options: Vec<TransformOption>,
}

impl OptionGroup {
    /// The options a transformer recognizes, as one required top-level group.
    ///
    /// A single set is used as is. With several sets, each becomes an optional
    /// subgroup, so a request may use any one of them without the others'
    /// required options. Names missing from the catalogue are returned
    /// separately.
    pub fn resolve<'a>(
        names: &'a [String],
        catalogue: &OptionCatalogue,
    ) -> (Self, Vec<&'a str>) {
        let mut sets = Vec::new();
        let mut missing = Vec::new();
        for name in names {
            match catalogue.get(name) {
                Some(set) => sets.push(set),
                None => missing.push(name.as_str()),
            }
        }
        let transform_options = match sets.as_slice() {
            [single] => single.to_vec(),
            _ => sets
                .into_iter()
                .map(|set| TransformOption::group(false, set.clone()))
                .collect(),
        };
        (
            Self {
                required: true,
                transform_options,
            },
            missing,
        )
    }

    pub fn is_empty(&self) -> bool {
        self.transform_options.is_empty()
    }

    /// All option names in this group and its subgroups.
    pub fn names(&self) -> Vec<&str> {
        let mut names = Vec::new();
        collect_names(&self.transform_options, &mut names);
        names
    }
}

fn collect_names<'a>(options: &'a [TransformOption], names: &mut Vec<&'a str>) {
    for option in options {
        match option {
            TransformOption::Value(v) => names.push(&v.name),
            TransformOption::Group(g) => collect_names(&g.transform_options, names),
        }
    }
}

/// Option names a request could use with this group, mapped to whether each is required.
pub fn possible_options(group: &OptionGroup, actual: &TransformOptions) -> IndexMap<String, bool> {
    let mut possible = IndexMap::new();
    add_possible(&mut possible, group, true, actual);
    possible
}

/// Adds a group's values if the group is required (and so are all its parents)
/// or if the request uses any option from it or from a subgroup that was added.
///
/// Returns true if anything was added.
fn add_possible(
    possible: &mut IndexMap<String, bool>,
    group: &OptionGroup,
    parent_required: bool,
    actual: &TransformOptions,
) -> bool {
    if group.transform_options.is_empty() {
        return false;
    }
    let group_required = group.required && parent_required;

    let mut used = false;
    let mut added = false;
    for option in &group.transform_options {
        match option {
            TransformOption::Group(sub) => {
                let sub_added = add_possible(possible, sub, group_required, actual);
                used |= sub_added;
                added |= sub_added;
            }
            TransformOption::Value(value) => {
                used |= actual.contains_key(&value.name);
            }
        }
    }

    if used || group_required {
        for option in &group.transform_options {
            if let TransformOption::Value(value) = option {
                possible.insert(value.name.clone(), value.required);
                added = true;
            }
        }
    }
    added
}

/// Whether every required option in `possible` is present in `actual`.
///
/// Options in `actual` that the transformer does not know about are ignored.
pub fn options_match(possible: &IndexMap<String, bool>, actual: &TransformOptions) -> bool {
    possible
        .iter()
        .filter(|(_, required)| **required)
        .all(|(name, _)| actual.contains_key(name))
}
