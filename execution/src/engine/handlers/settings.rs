use super::*;
use growbet_types::{settings, token, Package, Sequence, SupportRequest, UserId};
use std::str::FromStr;

impl<S: State + 'static, G: ChainGateway, K: KeyProvider> Engine<S, G, K> {
    // === Settings ===

    pub async fn setting(&self, name: &str) -> Result<Option<Setting>, Error> {
        as_setting(self.store.read(&Key::Setting(name.to_string())).await?)
    }

    /// Overrides a configuration value. Last writer wins.
    pub async fn set_setting(
        &self,
        name: &str,
        value: &str,
        set_by: Option<UserId>,
        now: u64,
    ) -> Result<Setting, Error> {
        let value = value.trim();
        if name == settings::TREASURY_ADDRESS {
            token::validate_address(value).map_err(Error::InvalidAddress)?;
        }
        let key = Key::Setting(name.to_string());
        let mut txn = self.store.lock(std::slice::from_ref(&key)).await?;
        let setting = Setting {
            value: value.to_string(),
            set_by,
            updated_at: now,
        };
        txn.put(key, Value::Setting(setting.clone()))?;
        txn.commit().await?;
        info!(name, value, set_by = ?set_by, "setting updated");
        Ok(setting)
    }

    /// Treasury address from settings, falling back to the configured one.
    pub async fn treasury_address(&self) -> Result<Option<String>, Error> {
        if let Some(setting) = self.setting(settings::TREASURY_ADDRESS).await? {
            return Ok(Some(setting.value));
        }
        Ok(self.policy.treasury_address.clone())
    }

    /// Purchase packages with per-package overrides applied.
    pub async fn packages(&self) -> Result<Vec<Package>, Error> {
        let mut packages = Vec::with_capacity(self.policy.packages.len());
        for package in &self.policy.packages {
            let mut package = package.clone();
            if let Some(price) = self.numeric_setting(&settings::package_price(package.number)).await? {
                package.price = price;
            }
            if let Some(growth) = self.numeric_setting(&settings::package_growth(package.number)).await? {
                package.growth = growth;
            }
            packages.push(package);
        }
        Ok(packages)
    }

    async fn numeric_setting<T: FromStr>(&self, name: &str) -> Result<Option<T>, Error> {
        let Some(setting) = self.setting(name).await? else {
            return Ok(None);
        };
        match setting.value.parse() {
            Ok(value) => Ok(Some(value)),
            Err(_) => {
                warn!(name, value = %setting.value, "ignoring malformed setting");
                Ok(None)
            }
        }
    }

    // === Support ===

    pub async fn request_support(&self, user: UserId, contact: &str, now: u64) -> Result<SupportRequest, Error> {
        let id = self.store.next_id(Sequence::SupportRequest).await?;
        let mut txn = self.store.lock(&[Key::SupportRequest(id)]).await?;
        let request = SupportRequest {
            id,
            user,
            contact: contact.trim().to_string(),
            resolved: false,
            created_at: now,
        };
        txn.put(Key::SupportRequest(id), Value::SupportRequest(request.clone()))?;
        txn.commit().await?;
        info!(request = id, user = %user, "support requested");
        Ok(request)
    }

    pub async fn support_request(&self, id: u64) -> Result<Option<SupportRequest>, Error> {
        match self.store.read(&Key::SupportRequest(id)).await? {
            None => Ok(None),
            Some(Value::SupportRequest(request)) => Ok(Some(request)),
            Some(other) => Err(Error::Invariant(format!("expected SupportRequest, found {other:?}"))),
        }
    }
}
