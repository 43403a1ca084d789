//! WebDriver implementation of [`OnrSigriPortal`].
//!
//! The map is a canvas, so most waits are fixed settle delays after an
//! interaction rather than element conditions.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;

use super::{OnrSigriPortal, SearchQuery};
use crate::driver::DriverError;
use crate::launcher::{Portal, PortalLauncher};
use crate::webdriver::{BrowserError, Locator, Session, WebDriverLauncher};

const LOGIN_URL: &str = "https://mapa.onr.org.br/sigri/login-usuario";
const MAP_URL: &str = "https://mapa.onr.org.br";

const CERT_BUTTON_WAIT: Duration = Duration::from_secs(10);
const SUGGESTION_WAIT: Duration = Duration::from_secs(10);
const DOWNLOAD_BUTTON_WAIT: Duration = Duration::from_secs(10);

const AFTER_LOGIN: Duration = Duration::from_secs(3);
const AFTER_MAP_LOAD: Duration = Duration::from_secs(5);
const AFTER_LAYER_MENU: Duration = Duration::from_secs(1);
const AFTER_TYPING: Duration = Duration::from_millis(1500);
const AFTER_SEARCH: Duration = Duration::from_secs(6);
const AFTER_MAP_CLICK: Duration = Duration::from_secs(2);

/// Containers the map libraries render into.
const MAP_CONTAINER: &str = ".ol-viewport, .leaflet-container, .mapboxgl-canvas, #map, canvas";

/// Innermost element holding both the layer label and a code label.
const DETAILS_BLOCK: &str = "//*[contains(., 'Camada:') and contains(., 'Código') \
    and not(*[contains(., 'Camada:') and contains(., 'Código')])]";

pub struct WebOnrSigriPortal {
    session: Session,
}

impl WebOnrSigriPortal {
    pub fn new(session: Session) -> Self {
        Self { session }
    }
}

fn unavailable(step: &'static str) -> impl FnOnce(BrowserError) -> DriverError {
    move |e| DriverError::ListingUnavailable(format!("{step}: {e}"))
}

#[async_trait]
impl Portal for WebOnrSigriPortal {
    async fn close(&mut self) -> Result<(), BrowserError> {
        self.session.close().await
    }
}

#[async_trait]
impl OnrSigriPortal for WebOnrSigriPortal {
    async fn login_with_certificate(&mut self) -> Result<(), BrowserError> {
        let s = &self.session;
        s.goto(LOGIN_URL).await?;
        let button = s
            .wait_for(&Locator::text("Entrar com Certificado Digital"), CERT_BUTTON_WAIT)
            .await;
        let result = match button {
            Ok(button) => s.click_or_force(&button).await,
            Err(e) => Err(e),
        };
        tokio::time::sleep(AFTER_LOGIN).await;
        result
    }

    async fn open_map(&mut self) -> Result<(), DriverError> {
        let s = &self.session;
        s.goto(MAP_URL).await?;
        s.wait_for(&Locator::css(MAP_CONTAINER), s.page_timeout())
            .await
            .map_err(unavailable("map did not load"))?;
        tokio::time::sleep(AFTER_MAP_LOAD).await;
        Ok(())
    }

    async fn search(&mut self, query: &SearchQuery) -> Result<(), DriverError> {
        let s = &self.session;
        let wait = s.element_wait();

        let (_, menu) = s
            .wait_for_any(
                &[Locator::text("Camada de Busca"), Locator::text("Camada")],
                wait,
            )
            .await
            .map_err(unavailable("search layer menu not found"))?;
        s.click_or_force(&menu).await?;
        tokio::time::sleep(AFTER_LAYER_MENU).await;

        let layer = s
            .wait_for(&Locator::text(query.kind.layer_label()), wait)
            .await
            .map_err(unavailable("search layer option not found"))?;
        s.click_or_force(&layer).await?;

        let input = s
            .wait_for(
                &Locator::css("input[type=text], input[type=search], input:not([type])"),
                wait,
            )
            .await
            .map_err(unavailable("search field not found"))?;
        s.fill(&input, &query.value).await?;
        tokio::time::sleep(AFTER_TYPING).await;

        let suggestion = s
            .wait_for_any(
                &[
                    Locator::css("[role='listbox'] [role='option']"),
                    Locator::css(".autocomplete li"),
                ],
                SUGGESTION_WAIT,
            )
            .await;
        match suggestion {
            Ok((_, option)) => s.click_or_force(&option).await?,
            Err(e) => {
                tracing::debug!(error = %e, "No autocomplete suggestion, submitting with Enter");
                s.press_enter(&input).await?;
            }
        }
        tokio::time::sleep(AFTER_SEARCH).await;
        Ok(())
    }

    async fn select_centre(&mut self) -> Result<(), BrowserError> {
        let s = &self.session;
        let map = s.wait_for(&Locator::css(MAP_CONTAINER), s.element_wait()).await?;
        s.click_centre(&map).await?;
        tokio::time::sleep(AFTER_MAP_CLICK).await;
        Ok(())
    }

    async fn details_block(&mut self) -> Result<Option<String>, BrowserError> {
        let s = &self.session;
        match s.wait_for(&Locator::text("Camada:"), s.element_wait()).await {
            Ok(_) => {}
            Err(BrowserError::Timeout(_)) => return Ok(None),
            Err(e) => return Err(e),
        }

        let blocks = s.find_all(&Locator::xpath(DETAILS_BLOCK)).await?;
        let text = match blocks.first() {
            Some(block) => s.text(block).await?,
            None => s.body_text().await?,
        };
        Ok(Some(text))
    }

    async fn download_polygon(&mut self) -> Result<PathBuf, BrowserError> {
        let s = &self.session;
        let before = s.prepare_download().await?;

        let (_, button) = s
            .wait_for_any(
                &[
                    Locator::text("Baixar polígono"),
                    Locator::css(
                        "[title*='Baixar'][title*='olígono'], [aria-label*='Baixar'][aria-label*='olígono']",
                    ),
                ],
                DOWNLOAD_BUTTON_WAIT,
            )
            .await
            .map_err(|_| BrowserError::NotFound("'Baixar polígono' action".into()))?;
        s.click_or_force(&button).await?;

        s.wait_for_download(&before, s.page_timeout()).await
    }
}

#[async_trait]
impl PortalLauncher<dyn OnrSigriPortal> for WebDriverLauncher {
    async fn launch(&self) -> Result<Box<dyn OnrSigriPortal>, BrowserError> {
        Ok(Box::new(WebOnrSigriPortal::new(self.start().await?)))
    }
}
