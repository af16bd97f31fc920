use vectile_shared::{BBox, EXTENT, GridIndex};

/// Where an indexed feature came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedFeature {
    pub source_layer: String,
    pub bucket_name: String,
    pub feature_index: usize,
}

/// Feature bounding boxes of one tile, in tile units, for hit testing
/// against rendered geometry.
pub struct FeatureIndex {
    grid: GridIndex<IndexedFeature>,
}

impl std::fmt::Debug for FeatureIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeatureIndex")
            .field("len", &self.grid.len())
            .finish()
    }
}

impl FeatureIndex {
    pub fn new(cell_size: u32) -> Self {
        Self {
            grid: GridIndex::new(EXTENT, EXTENT, cell_size),
        }
    }

    pub fn insert(&mut self, bbox: BBox, source_layer: &str, bucket_name: &str, feature_index: usize) {
        self.grid.insert_box(
            IndexedFeature {
                source_layer: source_layer.to_string(),
                bucket_name: bucket_name.to_string(),
                feature_index,
            },
            bbox,
        );
    }

    pub fn query(&self, bbox: &BBox) -> Vec<&IndexedFeature> {
        let mut hits = self.grid.query(bbox);
        hits.sort_by(|a, b| {
            (&a.bucket_name, a.feature_index).cmp(&(&b.bucket_name, b.feature_index))
        });
        hits
    }

    pub fn len(&self) -> usize {
        self.grid.len()
    }

    pub fn is_empty(&self) -> bool {
        self.grid.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_returns_features_under_the_box() {
        let mut index = FeatureIndex::new(512);
        index.insert(BBox::new(100.0, 100.0, 200.0, 200.0), "water", "water", 0);
        index.insert(BBox::new(150.0, 150.0, 400.0, 160.0), "roads", "roads", 4);
        index.insert(BBox::new(7000.0, 7000.0, 7100.0, 7100.0), "roads", "roads", 5);

        let hits = index.query(&BBox::new(140.0, 140.0, 160.0, 160.0));
        let found: Vec<(&str, usize)> = hits
            .iter()
            .map(|f| (f.bucket_name.as_str(), f.feature_index))
            .collect();
        assert_eq!(found, vec![("roads", 4), ("water", 0)]);
        assert_eq!(index.len(), 3);
        assert!(index.query(&BBox::new(3000.0, 3000.0, 3001.0, 3001.0)).is_empty());
    }
}
