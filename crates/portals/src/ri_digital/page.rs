//! WebDriver implementation of [`RiDigitalPortal`].

use std::path::Path;

use async_trait::async_trait;

use super::{ListingEntry, RiDigitalPortal};
use crate::driver::{DriverError, PortalCredentials};
use crate::launcher::{Portal, PortalLauncher};
use crate::webdriver::{
    move_download, xpath_literal, BrowserError, Element, Locator, Session, WebDriverLauncher,
};

const LOGIN_URL: &str = "https://ridigital.org.br/Acesso.aspx";
const HOME_PAGE: &str = "ServicosOnline.aspx";
const LISTING_PAGE: &str = "VisualizarMatricula";
const ORDER_PAGE: &str = "PedidoFinalizadoVM.aspx";

pub struct WebRiDigitalPortal {
    session: Session,
    /// Set once the listing has been reached; the reset target.
    listing_url: Option<String>,
}

impl WebRiDigitalPortal {
    pub fn new(session: Session) -> Self {
        Self {
            session,
            listing_url: None,
        }
    }

    async fn listing_row_elements(&self) -> Result<Vec<Element>, BrowserError> {
        let rows = self.session.find_all(&Locator::css("table tbody tr")).await?;
        if !rows.is_empty() {
            return Ok(rows);
        }
        self.session.find_all(&Locator::css("table tr")).await
    }
}

fn auth_failed(step: &'static str) -> impl FnOnce(BrowserError) -> DriverError {
    move |e| DriverError::AuthenticationFailed(format!("{step}: {e}"))
}

fn listing_unavailable(step: &'static str) -> impl FnOnce(BrowserError) -> DriverError {
    move |e| DriverError::ListingUnavailable(format!("{step}: {e}"))
}

#[async_trait]
impl Portal for WebRiDigitalPortal {
    async fn close(&mut self) -> Result<(), BrowserError> {
        self.session.close().await
    }
}

#[async_trait]
impl RiDigitalPortal for WebRiDigitalPortal {
    async fn login(&mut self, credentials: &PortalCredentials) -> Result<(), DriverError> {
        let s = &self.session;
        let wait = s.element_wait();

        s.goto(LOGIN_URL).await?;

        // A card overlay intercepts clicks on the "Acesso comum" label.
        let (_, common_access) = s
            .wait_for_any(
                &[
                    Locator::text("Acesso comum"),
                    Locator::xpath("//div[contains(normalize-space(.), 'Acesso comum')]"),
                ],
                wait,
            )
            .await
            .map_err(auth_failed("'Acesso comum' option not found"))?;
        s.force_click(&common_access).await?;

        let email = s
            .wait_for(&Locator::css("input[type=email]"), wait)
            .await
            .map_err(auth_failed("login form did not open"))?;
        let password = s
            .wait_for(&Locator::css("input[type=password]"), wait)
            .await
            .map_err(auth_failed("password field not found"))?;
        s.fill(&email, &credentials.login).await?;
        s.fill(&password, &credentials.secret).await?;

        let (_, submit) = s
            .wait_for_any(
                &[
                    Locator::xpath(
                        "//button[contains(translate(normalize-space(.), 'ENTRAR', 'entrar'), 'entrar')]",
                    ),
                    Locator::css("button[type=submit]"),
                    Locator::css("input[type=submit]"),
                ],
                wait,
            )
            .await
            .map_err(auth_failed("submit button not found"))?;
        s.click_or_force(&submit).await?;

        s.wait_for_url(HOME_PAGE, s.page_timeout())
            .await
            .map_err(auth_failed("portal rejected the credentials"))?;
        Ok(())
    }

    async fn open_listing(&mut self) -> Result<(), DriverError> {
        let s = &self.session;

        let (_, card) = s
            .wait_for_any(
                &[
                    Locator::text("Visualização de matrícula"),
                    Locator::text_ci("visualização de matrícula"),
                ],
                s.element_wait(),
            )
            .await
            .map_err(listing_unavailable("'Visualização de matrícula' not found"))?;
        s.click_or_force(&card).await?;

        let url = s
            .wait_for_url(LISTING_PAGE, s.page_timeout())
            .await
            .map_err(listing_unavailable("listing page did not load"))?;
        s.wait_for(&Locator::css("table"), s.page_timeout())
            .await
            .map_err(listing_unavailable("listing table did not render"))?;

        self.listing_url = Some(url);
        Ok(())
    }

    async fn listing_rows(&mut self) -> Result<Vec<Vec<String>>, DriverError> {
        let s = &self.session;
        let mut rows = Vec::new();
        for row in self.listing_row_elements().await? {
            let mut cells = Vec::new();
            for cell in s.find_within(&row, &Locator::css("td")).await? {
                cells.push(s.text(&cell).await?.trim().to_string());
            }
            rows.push(cells);
        }
        Ok(rows)
    }

    async fn return_to_listing(&mut self) -> Result<(), BrowserError> {
        let s = &self.session;
        let url = self
            .listing_url
            .clone()
            .ok_or_else(|| BrowserError::NotFound("listing was never opened".into()))?;

        // Even when already on the listing: a failed click can leave a
        // modal open or the grid half rendered.
        s.goto(&url).await?;
        s.wait_for_url(LISTING_PAGE, s.page_timeout()).await?;
        s.wait_for(&Locator::css("table"), s.page_timeout()).await?;
        Ok(())
    }

    async fn open_order(&mut self, entry: &ListingEntry) -> Result<(), BrowserError> {
        let s = &self.session;

        let by_protocolo = Locator::xpath(format!(
            "//table//tr[td[2][normalize-space(.)={}]]",
            xpath_literal(&entry.protocolo)
        ));
        let row = match s.find_all(&by_protocolo).await?.into_iter().next() {
            Some(row) => row,
            None => self
                .listing_row_elements()
                .await?
                .into_iter()
                .nth(entry.ordinal)
                .ok_or_else(|| BrowserError::NotFound(format!("listing row {}", entry.ordinal)))?,
        };

        let open_cell = s
            .find_within(&row, &Locator::css("td"))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| BrowserError::NotFound("open cell".into()))?;
        match s.find_within(&open_cell, &Locator::css("a")).await?.first() {
            Some(link) => s.click_or_force(link).await?,
            None => s.force_click(&open_cell).await?,
        }

        s.wait_for_url(ORDER_PAGE, s.page_timeout()).await?;
        Ok(())
    }

    async fn order_text(&mut self) -> Result<String, BrowserError> {
        self.session.body_text().await
    }

    async fn download_pdf(&mut self, dest: &Path) -> Result<(), BrowserError> {
        let s = &self.session;
        let before = s.prepare_download().await?;

        let (_, link) = s
            .wait_for_any(
                &[
                    Locator::text_ci("clique aqui para gerar o pdf"),
                    Locator::xpath("//a[contains(normalize-space(.), 'PDF')]"),
                ],
                s.element_wait(),
            )
            .await
            .map_err(|_| BrowserError::NotFound("PDF link on order page".into()))?;
        s.force_click(&link).await?;

        let file = s.wait_for_download(&before, s.page_timeout()).await?;
        move_download(&file, dest).await
    }
}

#[async_trait]
impl PortalLauncher<dyn RiDigitalPortal> for WebDriverLauncher {
    async fn launch(&self) -> Result<Box<dyn RiDigitalPortal>, BrowserError> {
        Ok(Box::new(WebRiDigitalPortal::new(self.start().await?)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::Duration;

    use axum::http::Method;
    use serde_json::{json, Value};

    use crate::webdriver::fake::{ok, FakeWebDriver};

    const LISTING: &str = "https://ridigital.org.br/VisualizarMatricula/DefaultVM.aspx";

    fn element() -> Value {
        json!([{ "element-6066-11e4-a52e-4f735466cecf": "e1" }])
    }

    fn portal(endpoint: &FakeWebDriver, download_dir: PathBuf) -> WebRiDigitalPortal {
        let session = Session::new(
            reqwest::Client::new(),
            &endpoint.url,
            "s1".into(),
            download_dir,
            Duration::from_secs(3),
            Duration::from_secs(1),
        );
        let mut portal = WebRiDigitalPortal::new(session);
        portal.listing_url = Some(LISTING.to_string());
        portal
    }

    #[tokio::test]
    async fn listing_is_reloaded_even_when_already_on_it() {
        let endpoint = FakeWebDriver::spawn(|method, path, _| match (method.as_str(), path) {
            ("GET", "/session/s1/url") => ok(json!(LISTING)),
            ("POST", "/session/s1/elements") => ok(element()),
            ("GET", "/session/s1/element/e1/displayed") => ok(json!(true)),
            _ => ok(Value::Null),
        })
        .await;
        let dir = tempfile::tempdir().unwrap();
        let mut portal = portal(&endpoint, dir.path().to_path_buf());

        portal.return_to_listing().await.unwrap();
        portal.return_to_listing().await.unwrap();

        let navigations: Vec<_> = endpoint
            .requests()
            .into_iter()
            .filter(|r| r.method == Method::POST && r.path == "/session/s1/url")
            .collect();
        assert_eq!(navigations.len(), 2);
        assert!(navigations.iter().all(|r| r.body["url"] == LISTING));

        portal.close().await.unwrap();
    }

    #[tokio::test]
    async fn pdf_saved_is_the_one_the_click_produced() {
        let dir = tempfile::tempdir().unwrap();
        let downloads = dir.path().join("session");
        std::fs::create_dir(&downloads).unwrap();
        // The previous order's PDF never finished before its timeout.
        std::fs::write(downloads.join("1001_1.pdf.crdownload"), b"%PDF-1.4 first").unwrap();

        let browser_dir = downloads.clone();
        let endpoint = FakeWebDriver::spawn(move |method, path, _| match (method.as_str(), path) {
            ("POST", "/session/s1/elements") => ok(element()),
            ("GET", "/session/s1/element/e1/displayed") => ok(json!(true)),
            ("POST", "/session/s1/execute/sync") => {
                std::fs::write(browser_dir.join("1002_2.pdf"), b"%PDF-1.4 second").unwrap();
                ok(Value::Null)
            }
            _ => ok(Value::Null),
        })
        .await;
        let mut portal = portal(&endpoint, downloads.clone());

        let dest = dir.path().join("ri-digital").join("1002_2.pdf");
        portal.download_pdf(&dest).await.unwrap();

        assert_eq!(std::fs::read(&dest).unwrap(), b"%PDF-1.4 second");
        assert!(!downloads.join("1001_1.pdf.crdownload").exists());

        portal.close().await.unwrap();
    }
}
