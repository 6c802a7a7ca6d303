pub mod models;
mod schema;
mod store;
mod trait_def;
pub mod validation;

pub use models::{
    Album, AlbumDetails, AlbumSummary, Artist, ArtistDetails, ArtistSummary, Country,
    CountrySummary, Genre, Song, SongDetails, SongFields, SongSummary,
};
pub use store::SqliteCatalogStore;
pub use trait_def::CatalogStore;
