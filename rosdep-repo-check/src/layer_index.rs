// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! OpenEmbedded layer index enumeration.

A layer index is a JSON REST API. Recipes reference layer branches by
id, layer branches reference layers by id, and layers carry the
human-meaningful name. Enumeration resolves those references and emits
entries keyed `<recipe>@<layer>` so the same recipe name in different
layers stays distinguishable.
*/

use {
    crate::{
        error::Result,
        fetch::{join_url, open_compressed_url},
        PackageEntry, PackageIter,
    },
    log::info,
    serde::Deserialize,
    std::collections::HashMap,
};

/// An id as the layer index serializes it. Some deployments emit
/// numbers, others strings.
#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq)]
#[serde(untagged)]
pub enum IndexId {
    Number(u64),
    Text(String),
}

impl IndexId {
    fn as_key(&self) -> String {
        match self {
            Self::Number(value) => value.to_string(),
            Self::Text(value) => value.clone(),
        }
    }

    fn is_empty(&self) -> bool {
        matches!(self, Self::Text(value) if value.is_empty())
    }
}

/// A record from the `layerItems` endpoint.
#[derive(Debug, Deserialize)]
pub struct LayerItem {
    pub id: Option<IndexId>,
    pub name: Option<String>,
}

/// A record from the `layerBranches` endpoint.
#[derive(Debug, Deserialize)]
pub struct LayerBranch {
    pub id: Option<IndexId>,
    pub layer: Option<IndexId>,
}

/// A record from the `recipes` endpoint.
#[derive(Debug, Deserialize)]
pub struct Recipe {
    pub id: Option<IndexId>,
    pub layerbranch: Option<IndexId>,
    pub pn: Option<String>,
    pub pv: Option<String>,
    pub provides: Option<String>,
}

fn fetch_json<T: serde::de::DeserializeOwned>(url: &str) -> Result<Vec<T>> {
    Ok(serde_json::from_reader(open_compressed_url(url)?)?)
}

/// Layer id to layer name, skipping records with missing fields.
fn layer_names(base_url: &str) -> Result<HashMap<String, String>> {
    let layers_url = join_url(base_url, "layerItems");

    info!("reading OpenEmbedded layers from {}", layers_url);

    let mut names = HashMap::new();

    for layer in fetch_json::<LayerItem>(&layers_url)? {
        let (id, name) = match (layer.id, layer.name) {
            (Some(id), Some(name)) if !id.is_empty() && !name.is_empty() => (id, name),
            _ => continue,
        };

        names.insert(id.as_key(), name);
    }

    Ok(names)
}

/// Layer branch id to layer name for branches of the given branch name.
fn layer_names_by_branch(base_url: &str, branch_name: &str) -> Result<HashMap<String, String>> {
    let layers = layer_names(base_url)?;

    let branches_url = format!(
        "{}?filter=branch__name:{}",
        join_url(base_url, "layerBranches"),
        branch_name
    );

    info!("reading OpenEmbedded layer branches from {}", branches_url);

    let mut names = HashMap::new();

    for branch in fetch_json::<LayerBranch>(&branches_url)? {
        let (id, layer) = match (branch.id, branch.layer) {
            (Some(id), Some(layer)) if !id.is_empty() && !layer.is_empty() => (id, layer),
            _ => continue,
        };

        if let Some(name) = layers.get(&layer.as_key()) {
            names.insert(id.as_key(), name.clone());
        }
    }

    Ok(names)
}

/// Enumerate recipes in an OpenEmbedded layer index.
pub fn enumerate_layer_index_packages(base_url: &str, branch_name: &str) -> Result<PackageIter> {
    let layer_branches = layer_names_by_branch(base_url, branch_name)?;

    let recipes_url = format!(
        "{}?filter=layerbranch__branch__name:{}",
        join_url(base_url, "recipes"),
        branch_name
    );

    info!("reading OpenEmbedded recipe metadata from {}", recipes_url);

    let mut entries = Vec::new();

    for recipe in fetch_json::<Recipe>(&recipes_url)? {
        let (id, layerbranch, pn) = match (recipe.id, recipe.layerbranch, recipe.pn) {
            (Some(id), Some(layerbranch), Some(pn))
                if !id.is_empty() && !layerbranch.is_empty() && !pn.is_empty() =>
            {
                (id, layerbranch, pn)
            }
            _ => continue,
        };

        let layer = match layer_branches.get(&layerbranch.as_key()) {
            Some(layer) => layer,
            None => continue,
        };

        let recipe_url = join_url(base_url, &format!("recipes/{}", id.as_key()));

        entries.push(
            PackageEntry::new(
                format!("{}@{}", pn, layer),
                recipe.pv.clone(),
                recipe_url.clone(),
            )
            .with_source_name(pn.clone())
            .with_binary_name(pn.clone()),
        );

        for provided in recipe
            .provides
            .as_deref()
            .unwrap_or_default()
            .split_whitespace()
        {
            entries.push(
                PackageEntry::new(
                    format!("{}@{}", provided, layer),
                    recipe.pv.clone(),
                    recipe_url.clone(),
                )
                .with_source_name(pn.clone())
                .with_binary_name(pn.clone()),
            );
        }
    }

    Ok(Box::new(entries.into_iter().map(Ok)))
}
