use serde::{Deserialize, Serialize};
use shared::config::{Backend, Config};
use std::collections::HashMap;
use std::sync::Arc;
use storage_engine::{MokaCacheAdapter, SledCacheAdapter};
use tokio::sync::{Mutex, broadcast};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tripwire::{CacheAdapter, CacheTargets, Context, MutationConfig, QueryConfig, TriggerEvent};

#[derive(Clone, Debug, Serialize, Deserialize)]
struct SearchRecipes {
    #[serde(rename = "searchFor")]
    search_for: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct Recipe {
    title: String,
    ingredient: String,
}

/// Stand-in for a remote recipe service
type RecipeStore = Arc<Mutex<HashMap<String, Vec<Recipe>>>>;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load environment variables
    match dotenvy::dotenv() {
        Ok(_) => info!("Loaded environment variables from .env file"),
        Err(_) => info!("No .env file found, using system environment variables"),
    }

    let config = Config::from_env();

    let cache: Arc<dyn CacheAdapter> = match &config.backend {
        Backend::Memory(max_entries) => {
            info!("Using in-memory cache backend (max entries: {:?})", max_entries);
            Arc::new(MokaCacheAdapter::new("tripwire-demo", *max_entries, None))
        }
        Backend::Sled(data_dir) => {
            info!("Using sled cache backend at {}", data_dir);
            Arc::new(SledCacheAdapter::new(format!("{}/cache.sled", data_dir))?)
        }
    };

    let (events, mut receiver) = broadcast::channel::<TriggerEvent>(64);
    tokio::spawn(async move {
        while let Ok(event) = receiver.recv().await {
            match event {
                TriggerEvent::Applied(e) => info!(
                    "Trigger applied: {} -> {} ({} key(s))",
                    e.mutation,
                    e.query,
                    e.keys.len()
                ),
                TriggerEvent::Failed(e) => {
                    warn!("Trigger failed: {} -> {}: {}", e.mutation, e.query, e.error)
                }
            }
        }
    });

    let context = Context::with_event_broadcaster(cache, events);
    let store: RecipeStore = Arc::new(Mutex::new(HashMap::new()));

    let mut query_config = QueryConfig::new("search_recipes");
    if let Some(seconds) = config.default_expiry_secs {
        query_config = query_config.with_expiry(seconds);
    }

    let search_store = store.clone();
    let search_recipes = context.query(query_config, move |input: SearchRecipes| {
        let store = search_store.clone();
        async move {
            info!("Fetching recipes for '{}' from the store", input.search_for);
            let recipes = store.lock().await;
            Ok::<_, String>(recipes.get(&input.search_for).cloned().unwrap_or_default())
        }
    });

    let add_store = store.clone();
    let add_recipe = context.mutation(MutationConfig::new("add_recipe"), move |recipe: Recipe| {
        let store = add_store.clone();
        async move {
            if recipe.title.trim().is_empty() {
                return Err("recipe title must not be empty".to_string());
            }
            let mut recipes = store.lock().await;
            recipes
                .entry(recipe.ingredient.clone())
                .or_default()
                .push(recipe.clone());
            Ok(recipe)
        }
    });

    // Adding a recipe rewrites the cached search for its ingredient in place
    search_recipes.updated_by(
        &add_recipe,
        |ctx| {
            Ok(CacheTargets::for_input(SearchRecipes {
                search_for: ctx.mutation_input.ingredient.clone(),
            }))
        },
        |ctx| {
            let mut recipes = ctx.cached_query_output.unwrap_or_default();
            if let Some(recipe) = ctx.mutation_output {
                recipes.push(recipe.clone());
            }
            Ok(recipes)
        },
    );

    let chocolate = SearchRecipes {
        search_for: "chocolate".to_string(),
    };

    let found = search_recipes.execute(chocolate.clone()).await?;
    info!("First search found {} recipe(s)", found.len());

    add_recipe
        .execute(Recipe {
            title: "Brownies".to_string(),
            ingredient: "chocolate".to_string(),
        })
        .await?;

    let found = search_recipes.execute(chocolate.clone()).await?;
    info!("Second search found {} recipe(s) without refetching", found.len());

    if let Err(e) = add_recipe
        .execute(Recipe {
            title: " ".to_string(),
            ingredient: "chocolate".to_string(),
        })
        .await
    {
        warn!("Mutation failed as expected: {}", e);
    }

    let found = search_recipes.execute(chocolate).await?;
    info!("Final search found {} recipe(s)", found.len());

    Ok(())
}
