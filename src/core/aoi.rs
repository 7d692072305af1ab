use crate::types::{BandData, BoundingBox, HeatError, HeatResult, Mask, RasterGrid};
use geo::{BoundingRect, Contains, Coord, LineString, Point, Polygon};
use ndarray::Array2;

/// Area of interest: the polygon every raster is clipped to and every
/// regional statistic is computed over
#[derive(Debug, Clone, PartialEq)]
pub struct Aoi {
    polygon: Polygon<f64>,
    bounds: BoundingBox,
}

impl Aoi {
    pub fn new(polygon: Polygon<f64>) -> HeatResult<Self> {
        let rect = polygon.bounding_rect().ok_or_else(|| {
            HeatError::InvalidParameter("area of interest polygon is empty".to_string())
        })?;
        if polygon.exterior().0.len() < 4 {
            return Err(HeatError::InvalidParameter(
                "area of interest needs at least three distinct vertices".to_string(),
            ));
        }
        let bounds = BoundingBox {
            min_x: rect.min().x,
            max_x: rect.max().x,
            min_y: rect.min().y,
            max_y: rect.max().y,
        };
        Ok(Self { polygon, bounds })
    }

    /// Polygon from an exterior ring of (x, y) vertices
    pub fn from_exterior(vertices: &[(f64, f64)]) -> HeatResult<Self> {
        let ring: Vec<Coord<f64>> = vertices.iter().map(|&(x, y)| Coord { x, y }).collect();
        Self::new(Polygon::new(LineString::new(ring), vec![]))
    }

    /// Axis-aligned rectangle
    pub fn from_bbox(bbox: &BoundingBox) -> HeatResult<Self> {
        Self::from_exterior(&[
            (bbox.min_x, bbox.min_y),
            (bbox.max_x, bbox.min_y),
            (bbox.max_x, bbox.max_y),
            (bbox.min_x, bbox.max_y),
        ])
    }

    pub fn polygon(&self) -> &Polygon<f64> {
        &self.polygon
    }

    pub fn bounds(&self) -> BoundingBox {
        self.bounds
    }

    pub fn contains(&self, x: f64, y: f64) -> bool {
        if x < self.bounds.min_x || x > self.bounds.max_x || y < self.bounds.min_y || y > self.bounds.max_y {
            return false;
        }
        self.polygon.contains(&Point::new(x, y))
    }

    pub fn overlaps(&self, bbox: &BoundingBox) -> bool {
        self.bounds.intersects(bbox)
    }

    /// Pixels of `grid` whose centre lies inside the polygon
    pub fn pixel_mask(&self, grid: &RasterGrid) -> Mask {
        if !self.overlaps(&grid.bounds()) {
            return Array2::from_elem(grid.dim(), false);
        }
        Array2::from_shape_fn(grid.dim(), |(row, col)| {
            let (x, y) = grid.pixel_center(row, col);
            self.contains(x, y)
        })
    }

    /// Set every sample outside the polygon to nodata
    pub fn clip(&self, data: &BandData, grid: &RasterGrid) -> HeatResult<BandData> {
        if data.dim() != grid.dim() {
            return Err(HeatError::GridMismatch(format!(
                "cannot clip {:?} band on {:?} grid",
                data.dim(),
                grid.dim()
            )));
        }
        let inside = self.pixel_mask(grid);
        let mut clipped = data.clone();
        clipped.zip_mut_with(&inside, |v, &keep| {
            if !keep {
                *v = None;
            }
        });
        Ok(clipped)
    }
}
