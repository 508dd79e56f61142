//! Tool domain: descriptors, CLI schema, adapter abstraction

pub mod adapter;
pub mod cli;
pub mod entities;
pub mod error;

pub use adapter::ToolAdapter;
pub use cli::{CliOption, CliPositional, CliRecipe, CliSchema, CliToolDefinition, RecipeParam};
pub use entities::{ParamType, RecipeSummary, Tool, ToolCallable, ToolParameter, ToolSummary};
pub use error::ToolError;
