use anyhow::{anyhow, bail, Context, Result};
use epidyn_core::plot::{PlotDocument, PlotPage};
use plotters::coord::Shift;
use plotters::prelude::*;
use plotters::style::register_font;
use std::path::Path;

const PAGE_WIDTH: u32 = 1200;
const PAGE_HEIGHT: u32 = 400;

const FONT_FAMILY: &str = "sans-serif";
static FONT_BYTES: &[u8] = include_bytes!("../assets/DejaVuSans.ttf");

/// Makes the embedded font available to plotters under `FONT_FAMILY`.
/// Registering again replaces the entry with the same bytes.
fn register_fonts() -> Result<()> {
    register_font(FONT_FAMILY, FontStyle::Normal, FONT_BYTES)
        .map_err(|_| anyhow!("embedded plot font is not a valid TrueType font"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Png,
    Svg,
}

/// Picks the image format from the file extension.
pub fn format_for(path: &Path) -> Result<ImageFormat> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("png") => Ok(ImageFormat::Png),
        Some("svg") => Ok(ImageFormat::Svg),
        _ => bail!(
            "plot output {} must end in .png or .svg",
            path.display()
        ),
    }
}

/// Renders the document as stacked panels, one per page, into a single image.
pub fn render(path: &Path, document: &PlotDocument) -> Result<()> {
    register_fonts()?;
    let size = (PAGE_WIDTH, PAGE_HEIGHT * document.len().max(1) as u32);
    let outcome = match format_for(path)? {
        ImageFormat::Svg => draw_document(SVGBackend::new(path, size).into_drawing_area(), document),
        ImageFormat::Png => {
            draw_document(BitMapBackend::new(path, size).into_drawing_area(), document)
        }
    };
    outcome.with_context(|| format!("Failed to render plot to {}", path.display()))
}

fn draw_document<DB: DrawingBackend>(
    root: DrawingArea<DB, Shift>,
    document: &PlotDocument,
) -> Result<()>
where
    DB::ErrorType: 'static,
{
    root.fill(&WHITE)?;
    let panels = root.split_evenly((document.len().max(1), 1));
    for (panel, page) in panels.iter().zip(&document.pages) {
        draw_page(panel, page)?;
    }
    root.present()?;
    Ok(())
}

fn draw_page<DB: DrawingBackend>(
    area: &DrawingArea<DB, Shift>,
    page: &PlotPage,
) -> Result<(), DrawingAreaErrorKind<DB::ErrorType>> {
    let (x_min, x_max, y_min, y_max) = page.bounds();

    let mut chart = ChartBuilder::on(area)
        .caption(&page.title, (FONT_FAMILY, 20))
        .margin(10)
        .x_label_area_size(30)
        .y_label_area_size(60)
        .build_cartesian_2d(x_min..x_max, y_min..y_max)?;

    chart
        .configure_mesh()
        .x_desc(page.labels.x.as_str())
        .y_desc(page.labels.y.as_str())
        .draw()?;

    for (idx, series) in page.series.iter().enumerate() {
        let color = Palette99::pick(idx).to_rgba();
        let drawn = chart.draw_series(LineSeries::new(series.points.iter().copied(), &color))?;
        if page.legend {
            drawn
                .label(series.name.as_str())
                .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color));
        }
    }

    if page.legend {
        chart
            .configure_series_labels()
            .background_style(WHITE.mix(0.8))
            .border_style(BLACK)
            .draw()?;
    }
    Ok(())
}
