use log::info;
use rusqlite::Connection;

use super::models::create_model;
use super::providers::create_provider;
use super::types::{ModelType, Provider, ProviderModel};
use crate::codec::SecretCodec;
use crate::errors::Result;

pub struct ModelSeed {
    pub model_id: &'static str,
    pub model_name: &'static str,
    pub model_type: ModelType,
    pub is_default: bool,
    pub max_tokens: Option<i64>,
}

pub struct ProviderSeed {
    pub name: &'static str,
    pub display: &'static str,
    pub description: &'static str,
    pub base_url: Option<&'static str>,
    pub requires_api_key: bool,
    pub models: &'static [ModelSeed],
}

pub const PROVIDER_SEEDS: &[ProviderSeed] = &[
    ProviderSeed {
        name: "openai",
        display: "OpenAI",
        description: "Hosted OpenAI API.",
        base_url: None,
        requires_api_key: true,
        models: &[
            ModelSeed {
                model_id: "gpt-4o",
                model_name: "GPT-4o",
                model_type: ModelType::Chat,
                is_default: true,
                max_tokens: Some(128_000),
            },
            ModelSeed {
                model_id: "gpt-4o-mini",
                model_name: "GPT-4o mini",
                model_type: ModelType::Chat,
                is_default: false,
                max_tokens: Some(128_000),
            },
            ModelSeed {
                model_id: "text-embedding-3-small",
                model_name: "text-embedding-3-small",
                model_type: ModelType::Embedding,
                is_default: true,
                max_tokens: Some(8_191),
            },
        ],
    },
    ProviderSeed {
        name: "ollama",
        display: "Ollama",
        description: "Local Ollama runtime exposing the OpenAI-compatible API.",
        base_url: Some("http://localhost:11434/v1"),
        requires_api_key: false,
        models: &[
            ModelSeed {
                model_id: "llama3.1",
                model_name: "Llama 3.1",
                model_type: ModelType::Chat,
                is_default: true,
                max_tokens: Some(8_192),
            },
            ModelSeed {
                model_id: "nomic-embed-text",
                model_name: "nomic-embed-text",
                model_type: ModelType::Embedding,
                is_default: true,
                max_tokens: Some(8_192),
            },
        ],
    },
];

/// Insert the built-in catalogue when the provider table is empty.
/// Returns the number of providers inserted.
pub fn seed_defaults(conn: &Connection, codec: &dyn SecretCodec) -> Result<usize> {
    let existing: i64 =
        conn.query_row("SELECT COUNT(1) FROM model_providers", [], |row| row.get(0))?;
    if existing > 0 {
        return Ok(0);
    }

    let tx = conn.unchecked_transaction()?;
    for seed in PROVIDER_SEEDS {
        let mut provider = Provider::new(seed.name, seed.display);
        provider.description = Some(seed.description.to_string());
        provider.base_url = seed.base_url.map(str::to_string);
        provider.requires_api_key = seed.requires_api_key;
        let provider_id = create_provider(&tx, codec, provider)?;

        for m in seed.models {
            let mut model =
                ProviderModel::new(&provider_id, m.model_id, m.model_name, m.model_type);
            model.is_default = m.is_default;
            model.max_tokens = m.max_tokens;
            create_model(&tx, model)?;
        }
    }
    tx.commit()?;

    info!("seeded {} default providers", PROVIDER_SEEDS.len());
    Ok(PROVIDER_SEEDS.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::AesGcmCodec;
    use crate::db::test_pool;
    use crate::registry::models::list_models;
    use crate::registry::providers::get_provider_by_name;

    #[test]
    fn seeds_once_into_an_empty_registry() {
        let (_dir, pool) = test_pool();
        let conn = pool.get().unwrap();
        let codec = AesGcmCodec::from_passphrase("seed");

        assert_eq!(seed_defaults(&conn, &codec).unwrap(), 2);
        assert_eq!(seed_defaults(&conn, &codec).unwrap(), 0);

        let ollama = get_provider_by_name(&conn, &codec, "ollama").unwrap().unwrap();
        assert!(!ollama.requires_api_key);
        let embeddings = list_models(&conn, &ollama.id, Some(ModelType::Embedding), false).unwrap();
        assert_eq!(embeddings.len(), 1);
        assert!(embeddings[0].is_default);
    }
}
