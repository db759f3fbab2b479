use kube_client::{
    discovery::{self, Scope},
    Client, Discovery,
};

use super::{ApiEntry, Resolver};

fn flatten_groups<'a>(groups: impl Iterator<Item = &'a discovery::ApiGroup> + 'a) -> Vec<ApiEntry> {
    groups
        .flat_map(|group| {
            group.versions().flat_map(move |version| {
                group
                    .versioned_resources(version)
                    .into_iter()
                    .map(|(resource, capabilities)| {
                        ApiEntry::new(resource, matches!(capabilities.scope, Scope::Namespaced))
                    })
            })
        })
        .collect()
}

impl Resolver {
    /// Builds a resolver from every version of every kind the apiserver serves.
    pub async fn discover(client: Client) -> Result<Self, kube_client::Error> {
        let resolver = Self::new(std::iter::empty());
        resolver.refresh(client).await?;
        Ok(resolver)
    }

    /// Adds kinds and versions the apiserver started serving since the last discovery,
    /// e.g. after a CRD was installed.
    pub async fn refresh(&self, client: Client) -> Result<(), kube_client::Error> {
        let discovery = Discovery::new(client).run().await?;
        let entries = flatten_groups(discovery.groups());
        log::debug!("discovered {} served kind versions", entries.len());
        self.extend(entries);
        Ok(())
    }
}
