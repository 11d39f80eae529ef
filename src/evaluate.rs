// Clustering quality measures and the 2D projection used for plotting.

mod agreement;
mod plot;
mod silhouette;
mod tsne;

pub use agreement::{contingency, Agreement};
pub use plot::write_scatter_svg;
pub use silhouette::silhouette_score;
pub use tsne::tsne;
